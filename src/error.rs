//! Error types for Synheart Drift

use thiserror::Error;

/// Errors that can occur during computation
///
/// Insufficient data is deliberately NOT an error: every compute stage
/// returns a sentinel-carrying value instead. The only fatal input
/// condition is a corrupted/out-of-order timestamp, which would make
/// finite-difference computations undefined.
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("Interval value out of range: {0} ms (accepted {1}..={2} ms)")]
    InvalidInterval(u32, u32, u32),

    #[error("Out-of-order sample: {arrived} is not after {last_seen}")]
    OutOfOrderSample {
        arrived: chrono::DateTime<chrono::Utc>,
        last_seen: chrono::DateTime<chrono::Utc>,
    },

    #[error("Out-of-order tick: {requested} is before {last_tick}")]
    OutOfOrderTick {
        requested: chrono::DateTime<chrono::Utc>,
        last_tick: chrono::DateTime<chrono::Utc>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Mode '{mode}' is unreachable: self-membership {membership:.3} below entry threshold {entry:.3}")]
    UnreachableMode {
        mode: String,
        membership: f64,
        entry: f64,
    },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}
