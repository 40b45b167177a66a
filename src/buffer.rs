//! Interval buffering
//!
//! A fixed-capacity rolling window of heartbeat-interval samples. Samples
//! arrive at irregular real-world cadence from the transport layer; the
//! buffer enforces value bounds and strict timestamp ordering, and evicts
//! oldest-first on overflow.

use crate::config::BufferConfig;
use crate::error::DriftError;
use crate::types::IntervalSample;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Rolling window of recent interval samples
#[derive(Debug, Clone)]
pub struct IntervalBuffer {
    samples: VecDeque<IntervalSample>,
    capacity: usize,
    min_interval_ms: u32,
    max_interval_ms: u32,
    last_timestamp: Option<DateTime<Utc>>,
}

impl IntervalBuffer {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            samples: VecDeque::with_capacity(config.capacity),
            capacity: config.capacity,
            min_interval_ms: config.min_interval_ms,
            max_interval_ms: config.max_interval_ms,
            last_timestamp: None,
        }
    }

    /// Record a new interval sample.
    ///
    /// Rejects values outside the configured bounds and timestamps that do
    /// not strictly advance — an out-of-order sample would make downstream
    /// finite differences undefined, so it is refused rather than silently
    /// accepted.
    pub fn push(&mut self, value_ms: u32, timestamp: DateTime<Utc>) -> Result<(), DriftError> {
        if value_ms < self.min_interval_ms || value_ms > self.max_interval_ms {
            return Err(DriftError::InvalidInterval(
                value_ms,
                self.min_interval_ms,
                self.max_interval_ms,
            ));
        }
        if let Some(last) = self.last_timestamp {
            if timestamp <= last {
                return Err(DriftError::OutOfOrderSample {
                    arrived: timestamp,
                    last_seen: last,
                });
            }
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(IntervalSample { value_ms, timestamp });
        self.last_timestamp = Some(timestamp);
        Ok(())
    }

    /// Interval values in arrival order, as milliseconds
    pub fn values_ms(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value_ms as f64).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Timestamp of the most recent sample
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// Drop all samples; used only at session boundaries.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.last_timestamp = None;
    }
}
