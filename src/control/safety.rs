//! Safety envelope
//!
//! Applied last, after any controller: clamps each setpoint to absolute
//! limits, bounds the per-minute move from the current actuator state,
//! and normalizes precision (temperatures to one decimal, fans to
//! integers). The envelope never rejects a proposal it can coerce; the
//! only refusal path is an inconsistent policy, where coercion would be
//! meaningless.

use crate::config::{Limits, PolicyError};
use crate::types::Setpoints;

/// Summary attached to every enforced command.
const SUMMARY: &str = "limits, rate limits applied";

/// An enforced command: setpoints inside the envelope plus the summary
/// of the rules applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SafeCommand {
    pub set: Setpoints,
    pub summary: String,
}

pub struct Safety {
    limits: Limits,
}

impl Safety {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Coerce `proposed` into the envelope relative to `current`.
    ///
    /// Idempotent: enforcing an already-enforced command is a no-op.
    /// Fails only on an invalid policy (inverted range, non-positive
    /// rate); callers must drop the command in that case rather than
    /// publish outside absolute limits.
    pub fn enforce(
        &self,
        current: &Setpoints,
        proposed: &Setpoints,
    ) -> Result<SafeCommand, PolicyError> {
        self.limits.validate()?;

        let temp_limits = &self.limits.temp_c;
        let fan_limits = &self.limits.fan_rpm;

        let mut temp = proposed.supply_temp_c.max(temp_limits.min).min(temp_limits.max);
        let mut fan = (proposed.fan_rpm as f64).max(fan_limits.min).min(fan_limits.max);

        temp = rate_limit(current.supply_temp_c, temp, temp_limits.max_delta_per_min);
        fan = rate_limit(current.fan_rpm as f64, fan, fan_limits.max_delta_per_min);

        Ok(SafeCommand {
            set: Setpoints {
                supply_temp_c: (temp * 10.0).round() / 10.0,
                fan_rpm: fan.round() as i64,
            },
            summary: SUMMARY.to_string(),
        })
    }
}

/// Move from `prev` toward `new` by at most `max_delta`.
fn rate_limit(prev: f64, new: f64, max_delta: f64) -> f64 {
    let delta = new - prev;
    if delta.abs() > max_delta {
        prev + max_delta.copysign(delta)
    } else {
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::DEFAULT_CURRENT;
    use crate::config::SetpointLimit;

    fn safety() -> Safety {
        Safety::new(Limits::default())
    }

    #[test]
    fn in_envelope_proposal_passes_through() {
        let proposed = Setpoints {
            supply_temp_c: 17.7,
            fan_rpm: 1350,
        };
        let safe = safety().enforce(&DEFAULT_CURRENT, &proposed).unwrap();
        assert_eq!(safe.set, proposed);
        assert_eq!(safe.summary, "limits, rate limits applied");
    }

    #[test]
    fn clamps_to_absolute_limits() {
        let current = Setpoints {
            supply_temp_c: 26.5,
            fan_rpm: 2150,
        };
        let proposed = Setpoints {
            supply_temp_c: 30.0,
            fan_rpm: 5000,
        };
        let safe = safety().enforce(&current, &proposed).unwrap();
        assert!((safe.set.supply_temp_c - 27.0).abs() < 1e-9);
        assert_eq!(safe.set.fan_rpm, 2200);
    }

    #[test]
    fn rate_limits_both_directions() {
        let proposed_up = Setpoints {
            supply_temp_c: 20.0,
            fan_rpm: 1700,
        };
        let safe = safety().enforce(&DEFAULT_CURRENT, &proposed_up).unwrap();
        assert!((safe.set.supply_temp_c - 19.0).abs() < 1e-9);
        assert_eq!(safe.set.fan_rpm, 1400);

        let proposed_down = Setpoints {
            supply_temp_c: 16.0,
            fan_rpm: 900,
        };
        let safe = safety().enforce(&DEFAULT_CURRENT, &proposed_down).unwrap();
        assert!((safe.set.supply_temp_c - 17.0).abs() < 1e-9);
        assert_eq!(safe.set.fan_rpm, 1000);
    }

    #[test]
    fn enforce_is_idempotent() {
        let grid: Vec<Setpoints> = [10.0, 16.0, 18.3, 23.0, 27.0, 40.0]
            .iter()
            .flat_map(|&t| {
                [500_i64, 800, 1200, 1999, 2200, 4000]
                    .iter()
                    .map(move |&f| Setpoints {
                        supply_temp_c: t,
                        fan_rpm: f,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        for proposed in &grid {
            let once = safety().enforce(&DEFAULT_CURRENT, proposed).unwrap();
            let twice = safety().enforce(&DEFAULT_CURRENT, &once.set).unwrap();
            assert_eq!(once, twice, "not idempotent for {proposed:?}");
        }
    }

    #[test]
    fn enforced_values_stay_inside_envelope() {
        let limits = Limits::default();
        for t in [-100.0, 0.0, 15.9, 16.0, 21.5, 27.0, 27.1, 100.0] {
            for f in [-10_i64, 0, 799, 800, 1500, 2200, 2201, 10_000] {
                let proposed = Setpoints {
                    supply_temp_c: t,
                    fan_rpm: f,
                };
                let safe = safety().enforce(&DEFAULT_CURRENT, &proposed).unwrap();
                assert!(safe.set.supply_temp_c >= limits.temp_c.min);
                assert!(safe.set.supply_temp_c <= limits.temp_c.max);
                assert!(safe.set.fan_rpm as f64 >= limits.fan_rpm.min);
                assert!(safe.set.fan_rpm as f64 <= limits.fan_rpm.max);
                assert!(
                    (safe.set.supply_temp_c - DEFAULT_CURRENT.supply_temp_c).abs()
                        <= limits.temp_c.max_delta_per_min + 1e-9
                );
                assert!(
                    ((safe.set.fan_rpm - DEFAULT_CURRENT.fan_rpm) as f64).abs()
                        <= limits.fan_rpm.max_delta_per_min
                );
            }
        }
    }

    #[test]
    fn invalid_policy_is_refused() {
        let safety = Safety::new(Limits {
            temp_c: SetpointLimit {
                min: 27.0,
                max: 16.0,
                max_delta_per_min: 1.0,
            },
            ..Limits::default()
        });
        let proposed = Setpoints {
            supply_temp_c: 18.0,
            fan_rpm: 1200,
        };
        assert!(safety.enforce(&DEFAULT_CURRENT, &proposed).is_err());
    }
}
