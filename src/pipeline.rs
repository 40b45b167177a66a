//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Drift. A `DriftSession`
//! owns every stateful component for one subject and runs the fixed tick
//! pipeline: feature derivation → trajectory tracking → mode classification
//! → movement annotation, producing one `TickRecord` per tick.
//!
//! There is no process-wide state: concurrent subjects are independent
//! `DriftSession` values, and a session's tick is a single critical section
//! — callers running producer and consumer on different execution contexts
//! serialize access behind their own lock.

use crate::annotator::annotate_movement;
use crate::buffer::IntervalBuffer;
use crate::classifier::ModeClassifier;
use crate::config::DriftConfig;
use crate::error::DriftError;
use crate::features::compute_features;
use crate::trajectory::TrajectoryTracker;
use crate::types::{TickMetrics, TickMode, TickPhase, TickRecord};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

/// Stateful per-session processor.
pub struct DriftSession {
    config: DriftConfig,
    session_id: String,
    buffer: IntervalBuffer,
    tracker: TrajectoryTracker,
    classifier: ModeClassifier,
    last_tick: Option<DateTime<Utc>>,
    last_record: Option<TickRecord>,
    tick_count: u64,
}

impl DriftSession {
    /// Create a session with the given configuration.
    ///
    /// The configuration is validated and the mode-reachability check is
    /// run up front: a config under which some mode could never establish
    /// is refused at construction, not discovered in production.
    pub fn new(config: DriftConfig) -> Result<Self, DriftError> {
        config.validate()?;
        config.verify_mode_reachability()?;
        Ok(Self {
            session_id: Uuid::new_v4().to_string(),
            buffer: IntervalBuffer::new(&config.buffer),
            tracker: TrajectoryTracker::new(&config),
            classifier: ModeClassifier::new(&config),
            config,
            last_tick: None,
            last_record: None,
            tick_count: 0,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Record one interval delivery from the transport layer.
    pub fn push_interval(
        &mut self,
        value_ms: u32,
        at: DateTime<Utc>,
    ) -> Result<(), DriftError> {
        self.buffer.push(value_ms, at)
    }

    /// Run one pipeline tick at `now`.
    ///
    /// Ticks must advance strictly in time. A tick repeated at exactly the
    /// previous tick's timestamp replays the cached record unchanged, so
    /// re-delivery of the same tick is idempotent; earlier timestamps are
    /// rejected. `hr_context` is passthrough context from the transport
    /// layer, never computed here.
    ///
    /// Data insufficiency is never an error: a cold session produces a
    /// complete record carrying the documented sentinels.
    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        hr_context: Option<f64>,
    ) -> Result<TickRecord, DriftError> {
        if let Some(last) = self.last_tick {
            if now == last {
                if let Some(record) = &self.last_record {
                    return Ok(record.clone());
                }
            }
            if now < last {
                return Err(DriftError::OutOfOrderTick {
                    requested: now,
                    last_tick: last,
                });
            }
        }

        // Stage 1: derive features from the interval buffer
        let snapshot = compute_features(&self.buffer, &self.config.features, now);

        // Stage 2: trajectory position + kinematics
        let kinematics = self.tracker.append(&snapshot, now);
        let position = self
            .tracker
            .last_position()
            .map(|p| p.0)
            .unwrap_or([0.0; 3]);

        // Stage 3: soft membership + hysteresis
        let classified = self.classifier.classify(&snapshot, now);

        // Stage 4: movement annotation over the membership trajectory
        let (movement_annotation, composed_label) = annotate_movement(
            &classified.membership,
            &classified.state,
            self.classifier.history(),
            Some(snapshot.legacy_trend_score),
            &self.config.annotator,
        );

        let primary_mode = classified
            .state
            .current_mode
            .unwrap_or(self.config.classifier.default_mode);

        let record = TickRecord {
            ts: now,
            hr_context,
            metrics: TickMetrics {
                amp: snapshot.amplitude_ms,
                rhythmic_coupling_score: snapshot.rhythmic_coupling_score,
                rhythmic_coupling_label: snapshot.rhythmic_coupling_label,
                breath_rate: snapshot.breath_rate_bpm,
                breath_steady: snapshot.breath_steady,
                volatility: snapshot.volatility,
                legacy_trend_score: snapshot.legacy_trend_score,
                legacy_trend_label: snapshot.legacy_trend_label,
            },
            phase: TickPhase {
                position,
                velocity: kinematics.velocity,
                velocity_mag: kinematics.velocity_mag,
                acceleration_magnitude: kinematics.acceleration_magnitude,
                stability: kinematics.stability,
                trajectory_integrity: kinematics.trajectory_integrity,
                windowed_path_signature: kinematics.windowed_path_signature,
                phase_label: kinematics.phase_label,
            },
            mode: TickMode {
                membership: classified.membership.to_map(),
                primary_mode,
                status: classified.state.status,
                dwell_time: classified.dwell_time_sec,
                movement_annotation,
                composed_label,
            },
        };

        debug!(
            session = %self.session_id,
            tick = self.tick_count,
            mode = primary_mode.as_str(),
            phase = record.phase.phase_label.as_str(),
            "tick complete"
        );

        self.last_tick = Some(now);
        self.last_record = Some(record.clone());
        self.tick_count += 1;
        Ok(record)
    }

    /// Full session reset: buffer, trajectory, classification history and
    /// hysteresis state. There is no partial-reset path.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.tracker.reset();
        self.classifier.reset();
        self.last_tick = None;
        self.last_record = None;
        self.tick_count = 0;
    }

    /// Ticks processed this session
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Samples currently buffered
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Whole-session trajectory path length (diagnostic)
    pub fn total_path_length(&self) -> f64 {
        self.tracker.total_path_length()
    }

    /// Mode transitions observed this session (diagnostic)
    pub fn transition_count(&self) -> u64 {
        self.classifier.transition_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HysteresisStatus, Mode, PhaseLabel};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn session() -> DriftSession {
        DriftSession::new(DriftConfig::default()).unwrap()
    }

    /// RR series with an exact 6-beat rhythm and a unique per-cycle peak
    fn entrained_interval(i: usize) -> u32 {
        let phase = 2.0 * std::f64::consts::PI * (i as f64 + 0.5) / 6.0;
        (800.0 + 50.0 * phase.sin()).round() as u32
    }

    #[test]
    fn test_cold_session_tick_produces_sentinel_record() {
        let mut session = session();
        let record = session.tick(t0(), None).unwrap();

        assert_eq!(record.metrics.amp, 0.0);
        assert_eq!(record.metrics.breath_rate, None);
        assert_eq!(record.phase.phase_label, PhaseLabel::WarmingUp);
        // A complete, well-typed record: membership present and normalized
        let total: f64 = record.mode.membership.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_constant_intervals_scenario() {
        // 30 constant 1000 ms intervals: amplitude 0, coupling ~0, high
        // stability once history accumulates.
        let mut session = session();
        for i in 0..30 {
            session
                .push_interval(1000, t0() + Duration::seconds(i))
                .unwrap();
        }
        let mut record = None;
        for i in 30..50 {
            record = Some(session.tick(t0() + Duration::seconds(i), None).unwrap());
        }
        let record = record.unwrap();

        assert_eq!(record.metrics.amp, 0.0);
        assert!(record.metrics.rhythmic_coupling_score < 1e-9);
        assert_eq!(record.metrics.volatility, 0.0);
        assert!(record.phase.stability > 0.95);
        assert_eq!(record.phase.phase_label, PhaseLabel::DwellingQuiet);
    }

    #[test]
    fn test_tick_is_idempotent_at_same_timestamp() {
        let mut session = session();
        for i in 0..32 {
            session
                .push_interval(entrained_interval(i), t0() + Duration::seconds(i as i64))
                .unwrap();
        }
        let tick_at = t0() + Duration::seconds(40);
        let first = session.tick(tick_at, Some(72.0)).unwrap();
        let replay = session.tick(tick_at, Some(72.0)).unwrap();
        assert_eq!(first, replay);
        assert_eq!(session.tick_count(), 1);
    }

    #[test]
    fn test_out_of_order_tick_rejected() {
        let mut session = session();
        session.tick(t0() + Duration::seconds(10), None).unwrap();
        let result = session.tick(t0() + Duration::seconds(5), None);
        assert!(matches!(result, Err(DriftError::OutOfOrderTick { .. })));
    }

    #[test]
    fn test_out_of_order_sample_rejected_without_corruption() {
        let mut session = session();
        for i in 0..20 {
            session
                .push_interval(800, t0() + Duration::seconds(i))
                .unwrap();
        }
        // One out-of-order delivery must be rejected...
        let result = session.push_interval(810, t0() + Duration::seconds(5));
        assert!(matches!(result, Err(DriftError::OutOfOrderSample { .. })));

        // ...and subsequent velocity computations stay finite and sane.
        for i in 20..30 {
            let record = session.tick(t0() + Duration::seconds(i), None).unwrap();
            assert!(record.phase.velocity_mag.is_finite());
            assert!(record.phase.acceleration_magnitude.is_finite());
        }
    }

    #[test]
    fn test_sustained_coherent_input_reaches_established() {
        // A session dwelling at coherent-like feature values must reach
        // `established` within a bounded number of ticks.
        let mut session = session();
        for i in 0..36 {
            session
                .push_interval(entrained_interval(i), t0() + Duration::seconds(i as i64))
                .unwrap();
        }
        let mut established_tick = None;
        for i in 0..60 {
            let record = session
                .tick(t0() + Duration::seconds(36 + i), None)
                .unwrap();
            assert_eq!(record.mode.primary_mode, Mode::Coherent);
            if record.mode.status == HysteresisStatus::Established && established_tick.is_none() {
                established_tick = Some(i);
            }
        }
        let established_tick = established_tick.expect("coherent mode must establish");
        assert!(established_tick <= 10, "took {} ticks", established_tick);
    }

    #[test]
    fn test_dwell_time_grows_while_mode_held() {
        let mut session = session();
        for i in 0..36 {
            session
                .push_interval(entrained_interval(i), t0() + Duration::seconds(i as i64))
                .unwrap();
        }
        let early = session.tick(t0() + Duration::seconds(40), None).unwrap();
        let late = session.tick(t0() + Duration::seconds(50), None).unwrap();
        assert!(late.mode.dwell_time > early.mode.dwell_time);
        assert!((late.mode.dwell_time - early.mode.dwell_time - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_settled_label_suppresses_qualifier() {
        let mut session = session();
        for i in 0..36 {
            session
                .push_interval(entrained_interval(i), t0() + Duration::seconds(i as i64))
                .unwrap();
        }
        let mut record = None;
        for i in 0..30 {
            record = Some(session.tick(t0() + Duration::seconds(36 + i), None).unwrap());
        }
        // Static buffer ⇒ static membership ⇒ settled ⇒ bare mode name
        let record = record.unwrap();
        assert_eq!(record.mode.movement_annotation.as_str(), "settled");
        assert_eq!(record.mode.composed_label, "coherent");
    }

    #[test]
    fn test_reset_returns_to_cold_state() {
        let mut session = session();
        for i in 0..36 {
            session
                .push_interval(entrained_interval(i), t0() + Duration::seconds(i as i64))
                .unwrap();
        }
        for i in 0..10 {
            session.tick(t0() + Duration::seconds(36 + i), None).unwrap();
        }
        session.reset();

        assert_eq!(session.tick_count(), 0);
        assert_eq!(session.buffered_samples(), 0);
        assert_eq!(session.total_path_length(), 0.0);

        // Timestamps from before the reset are a new timeline now
        let record = session.tick(t0(), None).unwrap();
        assert_eq!(record.phase.phase_label, PhaseLabel::WarmingUp);
        assert_eq!(record.mode.status, HysteresisStatus::Provisional);
    }

    #[test]
    fn test_hr_context_is_passthrough() {
        let mut session = session();
        let record = session.tick(t0(), Some(64.5)).unwrap();
        assert_eq!(record.hr_context, Some(64.5));
        let record = session.tick(t0() + Duration::seconds(1), None).unwrap();
        assert_eq!(record.hr_context, None);
    }

    #[test]
    fn test_independent_sessions_share_nothing() {
        let mut a = session();
        let mut b = session();
        assert_ne!(a.session_id(), b.session_id());

        for i in 0..36 {
            a.push_interval(entrained_interval(i), t0() + Duration::seconds(i as i64))
                .unwrap();
        }
        for i in 0..10 {
            a.tick(t0() + Duration::seconds(36 + i), None).unwrap();
        }
        // Session b saw none of it
        let record = b.tick(t0(), None).unwrap();
        assert_eq!(record.phase.phase_label, PhaseLabel::WarmingUp);
        assert_eq!(b.tick_count(), 1);
    }
}
