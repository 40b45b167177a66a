//! Synheart Drift - On-device autonomic state trajectory engine
//!
//! Drift turns a stream of heartbeat-interval measurements into a position
//! and trajectory in a bounded feature space, then classifies that
//! trajectory into a small set of named modes with stability guarantees,
//! through a deterministic per-tick pipeline: interval buffering → HRV
//! feature derivation → trajectory kinematics → soft mode classification
//! with hysteresis → movement annotation.
//!
//! ## Modules
//!
//! - **Buffer**: fixed-capacity rolling window of interval samples
//! - **Features**: per-tick HRV feature snapshot
//! - **Trajectory**: bounded position history and kinematics
//! - **Classifier**: soft centroid membership + hysteresis machine
//! - **Annotator**: mode movement annotation and composed labels
//! - **Pipeline**: per-session orchestration producing one record per tick

pub mod annotator;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod encoder;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod trajectory;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::{DriftConfig, CONFIG_VERSION};
pub use encoder::{DriftEncoder, DriftEnvelope, SCHEMA_VERSION};
pub use error::DriftError;
pub use pipeline::DriftSession;
pub use types::{Mode, TickRecord};

/// Drift version embedded in all output envelopes
pub const DRIFT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for output envelopes
pub const PRODUCER_NAME: &str = "synheart-drift";
