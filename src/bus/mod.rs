//! Message bus
//!
//! The broker is external; this module owns the client side: topic
//! constants, the QoS-1 subscriptions, JSON publishing, and parsing of
//! inbound messages into typed variants at the boundary.
//!
//! Publishing goes through the [`Bus`] trait so the engine can run
//! against a recording stub in tests; the MQTT implementation wraps a
//! `rumqttc` async client whose event loop the dispatcher task drives.

mod message;

pub use message::{BusMessage, DiscoverRawBatch, DiscoverResultsBatch};

use anyhow::Context;
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};

use crate::config::Settings;

/// Proposals awaiting operator approval.
pub const TOPIC_PROPOSALS: &str = "ctrl/proposals";
/// Scan requests consumed by the edge bridge.
pub const TOPIC_DISCOVER_START: &str = "ctrl/discover/start";
/// Registry change notifications.
pub const TOPIC_DISCOVER_APPROVED: &str = "discover/approved";
pub const TOPIC_DISCOVER_REMOVED: &str = "discover/removed";

/// Setpoint command topic for one device.
pub fn set_topic(device_id: &str) -> String {
    format!("ctrl/{device_id}/set")
}

/// Outbound JSON publishing at QoS 1.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> anyhow::Result<()>;
}

/// MQTT-backed bus client.
pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Connect to the broker named by `MQTT_URL` and register the QoS-1
    /// subscriptions the engine consumes. Returns the publish handle and
    /// the event loop the dispatcher must poll.
    pub async fn connect(settings: &Settings) -> anyhow::Result<(Self, EventLoop)> {
        let (host, port) = parse_mqtt_url(&settings.mqtt_url)
            .with_context(|| format!("invalid MQTT_URL {:?}", settings.mqtt_url))?;

        let mut options = MqttOptions::new("borealis-core", host, port);
        options.set_keep_alive(std::time::Duration::from_secs(30));
        if !settings.mqtt_user.is_empty() {
            options.set_credentials(&settings.mqtt_user, &settings.mqtt_pass);
        }

        let (client, event_loop) = AsyncClient::new(options, 256);
        for filter in [
            "site/+/rack/+/telemetry",
            "ctrl/+/receipt",
            "discover/#",
        ] {
            client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .with_context(|| format!("subscribing {filter}"))?;
        }

        Ok((Self { client }, event_loop))
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, body)
            .await
            .with_context(|| format!("publishing to {topic}"))?;
        Ok(())
    }
}

/// Split `mqtt://host[:port]` into host and port (default 1883).
fn parse_mqtt_url(url: &str) -> Option<(String, u16)> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    if rest.is_empty() {
        return None;
    }
    match rest.split_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((rest.to_string(), 1883)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_with_port() {
        assert_eq!(
            parse_mqtt_url("mqtt://broker.dc:2883"),
            Some(("broker.dc".to_string(), 2883))
        );
    }

    #[test]
    fn parses_url_without_port() {
        assert_eq!(
            parse_mqtt_url("mqtt://localhost"),
            Some(("localhost".to_string(), 1883))
        );
    }

    #[test]
    fn rejects_garbage_port() {
        assert_eq!(parse_mqtt_url("mqtt://host:notaport"), None);
        assert_eq!(parse_mqtt_url("mqtt://"), None);
    }

    #[test]
    fn set_topic_embeds_device() {
        assert_eq!(set_topic("crah-07"), "ctrl/crah-07/set");
    }
}
