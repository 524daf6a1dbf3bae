//! Rolling-window feature store
//!
//! One bounded FIFO per (rack, metric). Windows are created lazily on the
//! first push and live only in memory — the dispatcher task is the sole
//! writer, so no locking happens here.
//!
//! Reads are dense: a window always reads back as exactly N samples. When
//! fewer than N samples have arrived, the front is padded with the first
//! (oldest) known value, so older-than-history reads return the earliest
//! observation rather than zero.

use std::collections::{HashMap, VecDeque};

/// Bounded FIFO of samples, newest at the tail.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    size: usize,
    buf: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            buf: VecDeque::with_capacity(size),
        }
    }

    /// Append a sample, evicting the oldest once full. NaN is legal;
    /// downstream consumers handle it.
    pub fn push(&mut self, value: f64) {
        if self.buf.len() == self.size {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    /// Number of real samples present (≤ size).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Dense read of exactly `size` samples, left-padded with the first
    /// sample. An empty window reads as all zeros.
    pub fn dense(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.size);
        let pad = self.buf.front().copied().unwrap_or(0.0);
        out.resize(self.size.saturating_sub(self.buf.len()), pad);
        out.extend(self.buf.iter().copied());
        out
    }
}

/// Per-(rack, metric) window store owned by the decision engine.
#[derive(Debug)]
pub struct FeatureStore {
    window_size: usize,
    buffers: HashMap<(String, String), RollingWindow>,
}

impl FeatureStore {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            buffers: HashMap::new(),
        }
    }

    /// Append a sample, creating the window lazily.
    pub fn push(&mut self, rack: &str, metric: &str, value: f64) {
        self.buffers
            .entry((rack.to_string(), metric.to_string()))
            .or_insert_with(|| RollingWindow::new(self.window_size))
            .push(value);
    }

    /// Dense, left-padded read. A never-pushed window reads as zeros.
    pub fn window(&self, rack: &str, metric: &str) -> Vec<f64> {
        self.buffers
            .get(&(rack.to_string(), metric.to_string()))
            .map_or_else(|| vec![0.0; self.window_size], RollingWindow::dense)
    }

    /// True sample count for a window (0 when never pushed).
    pub fn samples(&self, rack: &str, metric: &str) -> usize {
        self.buffers
            .get(&(rack.to_string(), metric.to_string()))
            .map_or(0, RollingWindow::len)
    }

    /// Dense reads for every metric tracked for a rack.
    pub fn snapshot(&self, rack: &str) -> HashMap<String, Vec<f64>> {
        self.buffers
            .iter()
            .filter(|((r, _), _)| r == rack)
            .map(|((_, metric), window)| (metric.clone(), window.dense()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_read_is_always_window_size() {
        let mut store = FeatureStore::new(8);
        assert_eq!(store.window("r01", "temp_c").len(), 8);
        for i in 0..20 {
            store.push("r01", "temp_c", f64::from(i));
            assert_eq!(store.window("r01", "temp_c").len(), 8);
        }
    }

    #[test]
    fn partial_window_pads_with_oldest_sample() {
        let mut store = FeatureStore::new(5);
        store.push("r01", "temp_c", 21.0);
        store.push("r01", "temp_c", 22.0);
        assert_eq!(
            store.window("r01", "temp_c"),
            vec![21.0, 21.0, 21.0, 21.0, 22.0]
        );
    }

    #[test]
    fn full_window_evicts_oldest() {
        let mut store = FeatureStore::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            store.push("r01", "temp_c", v);
        }
        assert_eq!(store.window("r01", "temp_c"), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn empty_window_reads_zeros() {
        let store = FeatureStore::new(4);
        assert_eq!(store.window("r01", "temp_c"), vec![0.0; 4]);
        assert_eq!(store.samples("r01", "temp_c"), 0);
    }

    #[test]
    fn windows_are_per_rack_and_metric() {
        let mut store = FeatureStore::new(3);
        store.push("r01", "temp_c", 24.0);
        store.push("r02", "temp_c", 19.0);
        store.push("r01", "power_kw", 4.0);
        assert_eq!(store.samples("r01", "temp_c"), 1);
        assert_eq!(store.samples("r02", "temp_c"), 1);
        assert_eq!(store.window("r02", "temp_c")[2], 19.0);

        let snap = store.snapshot("r01");
        assert_eq!(snap.len(), 2);
        assert!(snap.contains_key("power_kw"));
    }

    #[test]
    fn nan_pushes_are_accepted() {
        let mut store = FeatureStore::new(3);
        store.push("r01", "temp_c", f64::NAN);
        assert_eq!(store.samples("r01", "temp_c"), 1);
        assert!(store.window("r01", "temp_c")[2].is_nan());
    }
}
