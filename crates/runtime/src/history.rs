//! Bounded tension history

use std::collections::VecDeque;

/// FIFO ring buffer of tension magnitudes, oldest first
///
/// Storage grows on push up to `capacity`; nothing is reserved up front.
#[derive(Debug, Clone)]
pub struct TensionHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl TensionHistory {
    /// # Panics
    ///
    /// Panics if `capacity` is zero. Capacities come from a validated config.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "tension history capacity must be > 0");
        Self {
            values: VecDeque::new(),
            capacity,
        }
    }

    /// Append a value, evicting the oldest when full
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Contiguous copy, oldest first
    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    /// `latest - mean(older values)`; zero with fewer than two values
    pub fn trend(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let older: f64 = self.values.iter().take(n - 1).sum::<f64>() / (n - 1) as f64;
        self.values[n - 1] - older
    }
}
