//! Bounded rolling window of the most recent readings

use std::collections::VecDeque;

use crate::SensorReading;

/// Default number of readings kept in memory
pub const DEFAULT_WINDOW_CAPACITY: usize = 1000;

/// Ring buffer of readings in arrival order.
///
/// When the buffer is full, the oldest readings are evicted.
#[derive(Debug, Clone)]
pub struct RollingStore {
    readings: VecDeque<SensorReading>,
    capacity: usize,
}

impl RollingStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append readings in order, then drop the oldest beyond capacity
    pub fn append(&mut self, readings: impl IntoIterator<Item = SensorReading>) {
        self.readings.extend(readings);
        let excess = self.readings.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.readings.drain(..excess);
        }
    }

    pub fn latest(&self) -> Option<&SensorReading> {
        self.readings.back()
    }

    /// Copy of the window, oldest first
    pub fn window(&self) -> Vec<SensorReading> {
        self.readings.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RollingStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}
