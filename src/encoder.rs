//! Output encoding
//!
//! Wraps tick records in a versioned JSON envelope carrying producer and
//! session identity. The envelope (and the record inside it) is the single
//! output boundary every downstream consumer — storage, delivery, replay —
//! depends on. Schema evolution is additive; renaming a field requires a
//! version bump.

use crate::error::DriftError;
use crate::types::TickRecord;
use crate::{DRIFT_VERSION, PRODUCER_NAME};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current tick-record schema version
pub const SCHEMA_VERSION: &str = "drift.tick_record.v1";

/// Producer metadata embedded in every envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Versioned envelope around one tick record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEnvelope {
    pub schema_version: String,
    pub producer: DriftProducer,
    pub session_id: String,
    pub record: TickRecord,
}

/// Encoder producing versioned envelopes
pub struct DriftEncoder {
    instance_id: String,
}

impl Default for DriftEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DriftEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Wrap a tick record in the versioned envelope
    pub fn encode(&self, session_id: &str, record: TickRecord) -> DriftEnvelope {
        DriftEnvelope {
            schema_version: SCHEMA_VERSION.to_string(),
            producer: DriftProducer {
                name: PRODUCER_NAME.to_string(),
                version: DRIFT_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            session_id: session_id.to_string(),
            record,
        }
    }

    /// Encode a tick record to an envelope JSON string
    pub fn encode_to_json(
        &self,
        session_id: &str,
        record: TickRecord,
    ) -> Result<String, DriftError> {
        serde_json::to_string(&self.encode(session_id, record))
            .map_err(|e| DriftError::EncodingError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriftConfig;
    use crate::pipeline::DriftSession;
    use chrono::{Duration, TimeZone, Utc};

    fn sample_record() -> (String, TickRecord) {
        let mut session = DriftSession::new(DriftConfig::default()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        for i in 0..30 {
            session
                .push_interval(800 + (i % 4) as u32 * 20, t0 + Duration::seconds(i))
                .unwrap();
        }
        let record = session.tick(t0 + Duration::seconds(30), Some(71.0)).unwrap();
        (session.session_id().to_string(), record)
    }

    #[test]
    fn test_envelope_identity_fields() {
        let (session_id, record) = sample_record();
        let encoder = DriftEncoder::with_instance_id("instance-1".to_string());
        let envelope = encoder.encode(&session_id, record);

        assert_eq!(envelope.schema_version, SCHEMA_VERSION);
        assert_eq!(envelope.producer.name, PRODUCER_NAME);
        assert_eq!(envelope.producer.instance_id, "instance-1");
        assert_eq!(envelope.session_id, session_id);
    }

    #[test]
    fn test_json_shape_matches_boundary_schema() {
        let (session_id, record) = sample_record();
        let encoder = DriftEncoder::new();
        let json = encoder.encode_to_json(&session_id, record).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["schema_version"], "drift.tick_record.v1");
        let record = &value["record"];
        assert!(record["ts"].is_string());
        assert_eq!(record["hr_context"], 71.0);
        assert!(record["metrics"]["amp"].is_number());
        assert!(record["metrics"]["rhythmic_coupling_score"].is_number());
        assert!(record["metrics"]["legacy_trend_label"].is_string());
        assert_eq!(record["phase"]["position"].as_array().unwrap().len(), 3);
        assert_eq!(record["phase"]["velocity"].as_array().unwrap().len(), 3);
        assert!(record["phase"]["windowed_path_signature"].is_number());
        assert_eq!(record["mode"]["membership"].as_object().unwrap().len(), 6);
        assert!(record["mode"]["primary_mode"].is_string());
        assert!(record["mode"]["dwell_time"].is_number());
        assert!(record["mode"]["composed_label"].is_string());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let (session_id, record) = sample_record();
        let encoder = DriftEncoder::new();
        let json = encoder.encode_to_json(&session_id, record).unwrap();
        let decoded: DriftEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.schema_version, SCHEMA_VERSION);
        assert_eq!(decoded.session_id, session_id);
    }

    #[test]
    fn test_absent_optionals_are_omitted() {
        let mut session = DriftSession::new(DriftConfig::default()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let record = session.tick(t0, None).unwrap();

        let json = serde_json::to_string(&record).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("hr_context").is_none());
        assert!(value["metrics"].get("breath_rate").is_none());
    }
}
