//! Trajectory tracking
//!
//! Maps each feature snapshot onto a normalized 3-axis position, keeps a
//! bounded history of positions, and derives per-tick kinematics: velocity,
//! acceleration magnitude, a stability heuristic, a windowed trajectory
//! integrity score, and a windowed path signature.
//!
//! The feature axes are smoothed aggregates, not raw state variables — this
//! is not a phase-space reconstruction and makes no dynamical-systems
//! claims.

use crate::config::{DriftConfig, TrajectoryConfig};
use crate::types::{
    FeatureSnapshot, PhaseLabel, TrajectoryKinematics, TrajectoryPosition, TrajectoryState,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::warn;

/// Shared default for stability whenever the history cannot support the
/// computation (cold start and short history use this same constant).
pub const DEFAULT_STABILITY: f64 = 0.5;

/// Shared default for trajectory integrity under the same conditions.
pub const DEFAULT_INTEGRITY: f64 = 0.5;

/// Velocity magnitude below which a vector has no usable direction
const DIRECTION_EPS: f64 = 1e-6;

/// Variance floor below which a magnitude series counts as motionless
const VARIANCE_EPS: f64 = 1e-12;

/// Stateful tracker of the feature trajectory
#[derive(Debug, Clone)]
pub struct TrajectoryTracker {
    config: TrajectoryConfig,
    /// Breath band used to normalize the breath axis
    breath_rate_min: f64,
    breath_rate_max: f64,
    /// Bounded, time-ordered position history; never empty after the first
    /// append
    history: VecDeque<TrajectoryState>,
    /// Whole-session cumulative path length. Diagnostic only — the
    /// windowed path signature never reads this.
    cumulative_path_length: f64,
}

impl TrajectoryTracker {
    pub fn new(config: &DriftConfig) -> Self {
        Self {
            config: config.trajectory.clone(),
            breath_rate_min: config.features.breath_rate_min,
            breath_rate_max: config.features.breath_rate_max,
            history: VecDeque::with_capacity(config.trajectory.history_capacity),
            cumulative_path_length: 0.0,
        }
    }

    /// Map a snapshot into trajectory space, append it, and compute the
    /// kinematics of the updated trajectory.
    pub fn append(
        &mut self,
        snapshot: &FeatureSnapshot,
        timestamp: DateTime<Utc>,
    ) -> TrajectoryKinematics {
        let position = self.position_from(snapshot);

        if let Some(last) = self.history.back() {
            self.cumulative_path_length += last.position.distance(&position);
        }
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(TrajectoryState {
            position,
            timestamp,
        });

        self.compute_kinematics(position)
    }

    /// Clear history and cumulative path length; used only at session
    /// boundaries.
    pub fn reset(&mut self) {
        self.history.clear();
        self.cumulative_path_length = 0.0;
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Most recent position, if any state has been appended
    pub fn last_position(&self) -> Option<TrajectoryPosition> {
        self.history.back().map(|s| s.position)
    }

    /// Whole-session path length (diagnostic)
    pub fn total_path_length(&self) -> f64 {
        self.cumulative_path_length
    }

    /// Axes: rhythmic coupling score, normalized breath rate (midpoint when
    /// absent), normalized amplitude.
    fn position_from(&self, snapshot: &FeatureSnapshot) -> TrajectoryPosition {
        let breath_norm = match snapshot.breath_rate_bpm {
            Some(rate) => ((rate - self.breath_rate_min)
                / (self.breath_rate_max - self.breath_rate_min))
                .clamp(0.0, 1.0),
            None => 0.5,
        };
        TrajectoryPosition([
            snapshot.rhythmic_coupling_score,
            breath_norm,
            snapshot.amplitude_norm,
        ])
    }

    fn compute_kinematics(&self, position: TrajectoryPosition) -> TrajectoryKinematics {
        let states: Vec<&TrajectoryState> = self.history.iter().collect();
        let n = states.len();

        // Velocity: first-order finite difference; zero vector on the
        // first append.
        let (velocity, velocity_mag) = if n >= 2 {
            let v = finite_difference(states[n - 2], states[n - 1]);
            let mag = magnitude(&v);
            (v, mag)
        } else {
            ([0.0; 3], 0.0)
        };

        // Acceleration magnitude: second finite difference over the average
        // of the two surrounding time deltas. Not geometric curvature.
        let acceleration_magnitude = if n >= 3 {
            let dt1 = elapsed_sec(states[n - 3].timestamp, states[n - 2].timestamp);
            let dt2 = elapsed_sec(states[n - 2].timestamp, states[n - 1].timestamp);
            let v1 = finite_difference(states[n - 3], states[n - 2]);
            let v2 = finite_difference(states[n - 2], states[n - 1]);
            let mean_dt = (dt1 + dt2) / 2.0;
            if mean_dt > 0.0 {
                let dv = [v2[0] - v1[0], v2[1] - v1[1], v2[2] - v1[2]];
                magnitude(&dv) / mean_dt
            } else {
                0.0
            }
        } else {
            0.0
        };

        // Stability heuristic: monotonically decreasing in velocity and
        // acceleration magnitude. Not a dynamical-systems stability proof.
        let stability = if n >= 2 {
            clamp_guard(
                "stability",
                1.0 / (1.0 + 2.0 * (velocity_mag + 0.5 * acceleration_magnitude)),
            )
        } else {
            DEFAULT_STABILITY
        };

        let trajectory_integrity = self.compute_integrity(&states);
        let windowed_path_signature = self.compute_path_signature(&states);

        let phase_label = classify_phase(
            &self.config,
            n,
            &velocity,
            velocity_mag,
            acceleration_magnitude,
            trajectory_integrity,
            position.0[0],
        );

        TrajectoryKinematics {
            velocity,
            velocity_mag,
            acceleration_magnitude,
            stability,
            trajectory_integrity,
            windowed_path_signature,
            phase_label,
        }
    }

    /// Windowed self-similarity of the trajectory: 50% lag-1 autocorrelation
    /// of velocity magnitudes, 50% direction consistency (cosine similarity
    /// at a fixed lag). Both terms are mapped onto 0-1.
    ///
    /// A near-motionless window maps to 1.0 by definition. That shortcut
    /// structurally favors whatever signal drives low motion — integrity and
    /// stability are coupled through it, not independent scores.
    fn compute_integrity(&self, states: &[&TrajectoryState]) -> f64 {
        let velocities = velocity_series(states);
        if velocities.len() < self.config.integrity_min_velocities {
            return DEFAULT_INTEGRITY;
        }

        let magnitudes: Vec<f64> = velocities.iter().map(magnitude).collect();
        let self_similarity = match lagged_pearson(&magnitudes, 1) {
            // Motionless or perfectly even motion: self-similar by definition
            None => 1.0,
            Some(r) => (r + 1.0) / 2.0,
        };

        let lag = self.config.integrity_direction_lag;
        let direction_consistency = if velocities.len() > lag {
            let mut total = 0.0;
            let mut count = 0;
            for i in 0..velocities.len() - lag {
                total += match cosine_similarity(&velocities[i], &velocities[i + lag]) {
                    // Pairs without usable direction count as consistent
                    None => 1.0,
                    Some(c) => (c + 1.0) / 2.0,
                };
                count += 1;
            }
            total / count as f64
        } else {
            1.0
        };

        clamp_guard(
            "trajectory_integrity",
            0.5 * self_similarity + 0.5 * direction_consistency,
        )
    }

    /// Path length accumulated within the current history window, over that
    /// same window's time span, saturated onto 0-1. Window-local by
    /// construction: unrelated total session length cannot move it.
    fn compute_path_signature(&self, states: &[&TrajectoryState]) -> f64 {
        if states.len() < 2 {
            return 0.0;
        }
        let span = elapsed_sec(states[0].timestamp, states[states.len() - 1].timestamp);
        if span <= 0.0 {
            return 0.0;
        }
        let length: f64 = states
            .windows(2)
            .map(|pair| pair[0].position.distance(&pair[1].position))
            .sum();
        let rate = length / span;
        clamp_guard(
            "windowed_path_signature",
            1.0 - (-rate / self.config.path_rate_scale).exp(),
        )
    }
}

/// State classification over the current kinematics.
fn classify_phase(
    config: &TrajectoryConfig,
    history_len: usize,
    velocity: &[f64; 3],
    velocity_mag: f64,
    acceleration_magnitude: f64,
    integrity: f64,
    coupling_axis: f64,
) -> PhaseLabel {
    if history_len < config.warmup_min_states {
        return PhaseLabel::WarmingUp;
    }

    if velocity_mag < config.velocity_low {
        if integrity >= config.integrity_high {
            if coupling_axis >= config.coupling_dwell_min {
                return PhaseLabel::DwellingCoupled;
            }
            return PhaseLabel::DwellingQuiet;
        }
        return PhaseLabel::VigilantStillness;
    }

    if velocity_mag >= config.velocity_high {
        if acceleration_magnitude >= config.accel_high {
            // Inflection direction follows the coupling axis of the
            // velocity already in the kinematics
            if velocity[0] >= 0.0 {
                return PhaseLabel::InflectionSeeking;
            }
            return PhaseLabel::InflectionFromCoupling;
        }
        return PhaseLabel::ActiveTransition;
    }

    if acceleration_magnitude < config.accel_high {
        return PhaseLabel::Settling;
    }
    PhaseLabel::ActiveTransition
}

fn velocity_series(states: &[&TrajectoryState]) -> Vec<[f64; 3]> {
    states
        .windows(2)
        .map(|pair| finite_difference(pair[0], pair[1]))
        .collect()
}

fn finite_difference(from: &TrajectoryState, to: &TrajectoryState) -> [f64; 3] {
    let dt = elapsed_sec(from.timestamp, to.timestamp);
    if dt <= 0.0 {
        return [0.0; 3];
    }
    let a = from.position.0;
    let b = to.position.0;
    [(b[0] - a[0]) / dt, (b[1] - a[1]) / dt, (b[2] - a[2]) / dt]
}

fn elapsed_sec(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

fn magnitude(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Cosine similarity; `None` when either vector has no usable direction
fn cosine_similarity(a: &[f64; 3], b: &[f64; 3]) -> Option<f64> {
    let mag_a = magnitude(a);
    let mag_b = magnitude(b);
    if mag_a < DIRECTION_EPS || mag_b < DIRECTION_EPS {
        return None;
    }
    let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    Some(dot / (mag_a * mag_b))
}

/// Pearson correlation of a series against its lag-shifted self, with
/// covariance and variances over the same lag-adjusted count. `None` when
/// either aligned segment is (near) constant.
fn lagged_pearson(values: &[f64], lag: usize) -> Option<f64> {
    if values.len() <= lag + 1 {
        return None;
    }
    let m = values.len() - lag;
    let head = &values[..m];
    let tail = &values[lag..];
    let mean_head: f64 = head.iter().sum::<f64>() / m as f64;
    let mean_tail: f64 = tail.iter().sum::<f64>() / m as f64;

    let mut cov = 0.0;
    let mut var_head = 0.0;
    let mut var_tail = 0.0;
    for i in 0..m {
        let a = head[i] - mean_head;
        let b = tail[i] - mean_tail;
        cov += a * b;
        var_head += a * a;
        var_tail += b * b;
    }
    if var_head / (m as f64) < VARIANCE_EPS || var_tail / (m as f64) < VARIANCE_EPS {
        return None;
    }
    Some(cov / (var_head * var_tail).sqrt())
}

/// Last-resort invariant guard. Correct normalization upstream is supposed
/// to keep values in range; an activation here is a formula error surfacing
/// and is logged so it fails loudly during development.
fn clamp_guard(name: &str, value: f64) -> f64 {
    if !(-1e-9..=1.0 + 1e-9).contains(&value) {
        warn!(field = name, value, "bounded-range field required clamping");
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriftConfig;
    use crate::types::{CouplingLabel, TrendLabel};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn snapshot(coupling: f64, breath: Option<f64>, amp_norm: f64) -> FeatureSnapshot {
        FeatureSnapshot {
            amplitude_ms: amp_norm * 200.0,
            amplitude_norm: amp_norm,
            rhythmic_coupling_score: coupling,
            rhythmic_coupling_label: CouplingLabel::Low,
            breath_rate_bpm: breath,
            breath_steady: breath.is_some(),
            volatility: 0.2,
            legacy_trend_score: 0.3,
            legacy_trend_label: TrendLabel::Unsettled,
            sample_count: 32,
            timestamp: t0(),
        }
    }

    fn tracker() -> TrajectoryTracker {
        TrajectoryTracker::new(&DriftConfig::default())
    }

    #[test]
    fn test_first_append_uses_shared_defaults() {
        let mut tracker = tracker();
        let kin = tracker.append(&snapshot(0.5, None, 0.5), t0());

        assert_eq!(kin.velocity, [0.0; 3]);
        assert_eq!(kin.velocity_mag, 0.0);
        assert_eq!(kin.stability, DEFAULT_STABILITY);
        assert_eq!(kin.trajectory_integrity, DEFAULT_INTEGRITY);
        assert_eq!(kin.phase_label, PhaseLabel::WarmingUp);
    }

    #[test]
    fn test_breath_axis_midpoint_when_absent() {
        let mut tracker = tracker();
        tracker.append(&snapshot(0.0, None, 0.0), t0());
        // coupling 0, breath midpoint 0.5, amplitude 0
        let state = tracker.history.back().unwrap();
        assert_eq!(state.position.0, [0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_motionless_trajectory_high_stability_and_integrity() {
        let mut tracker = tracker();
        let mut kin = tracker.append(&snapshot(0.2, None, 0.3), t0());
        for i in 1..20 {
            kin = tracker.append(&snapshot(0.2, None, 0.3), t0() + Duration::seconds(i));
        }

        assert_eq!(kin.velocity_mag, 0.0);
        assert!((kin.stability - 1.0).abs() < 1e-9);
        assert!((kin.trajectory_integrity - 1.0).abs() < 1e-9);
        assert_eq!(kin.windowed_path_signature, 0.0);
        assert_eq!(kin.phase_label, PhaseLabel::DwellingQuiet);
    }

    #[test]
    fn test_motionless_coupled_trajectory_dwells_coupled() {
        let mut tracker = tracker();
        let mut kin = tracker.append(&snapshot(0.8, Some(12.0), 0.6), t0());
        for i in 1..20 {
            kin = tracker.append(&snapshot(0.8, Some(12.0), 0.6), t0() + Duration::seconds(i));
        }
        assert_eq!(kin.phase_label, PhaseLabel::DwellingCoupled);
    }

    #[test]
    fn test_constant_velocity_zero_acceleration() {
        let mut tracker = tracker();
        let mut kin = tracker.append(&snapshot(0.0, None, 0.0), t0());
        for i in 1..10 {
            let c = 0.05 * i as f64;
            kin = tracker.append(&snapshot(c, None, 0.0), t0() + Duration::seconds(i));
        }
        assert!((kin.velocity_mag - 0.05).abs() < 1e-9);
        assert!(kin.acceleration_magnitude < 1e-9);
    }

    #[test]
    fn test_direction_flip_produces_acceleration() {
        let mut tracker = tracker();
        tracker.append(&snapshot(0.0, None, 0.0), t0());
        tracker.append(&snapshot(0.1, None, 0.0), t0() + Duration::seconds(1));
        let kin = tracker.append(&snapshot(0.0, None, 0.0), t0() + Duration::seconds(2));
        // v went +0.1/s then −0.1/s: |Δv| / mean(dt) = 0.2
        assert!((kin.acceleration_magnitude - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_path_signature_ignores_session_length() {
        // Equal instantaneous dynamics, different total session lengths:
        // the windowed signature must agree.
        let run = |total_ticks: usize| {
            let mut tracker = tracker();
            let mut last = 0.0;
            for i in 0..total_ticks {
                // steady oscillation along the coupling axis
                let c = 0.3 + 0.1 * ((i % 2) as f64);
                let kin = tracker.append(&snapshot(c, None, 0.2), t0() + Duration::seconds(i as i64));
                last = kin.windowed_path_signature;
            }
            last
        };
        let short_session = run(60);
        let long_session = run(240);
        assert!(
            (short_session - long_session).abs() < 1e-9,
            "signature must not grow with session length: {} vs {}",
            short_session,
            long_session
        );
        assert!(short_session > 0.0);
    }

    #[test]
    fn test_cumulative_path_is_session_wide() {
        let mut tracker = tracker();
        for i in 0..100 {
            let c = 0.3 + 0.1 * ((i % 2) as f64);
            tracker.append(&snapshot(c, None, 0.2), t0() + Duration::seconds(i));
        }
        // 99 hops of 0.1 each
        assert!((tracker.total_path_length() - 9.9).abs() < 1e-9);
    }

    #[test]
    fn test_history_bounded() {
        let mut tracker = tracker();
        for i in 0..100 {
            tracker.append(&snapshot(0.5, None, 0.5), t0() + Duration::seconds(i));
        }
        assert_eq!(tracker.history_len(), 30);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut tracker = tracker();
        for i in 0..10 {
            let c = 0.1 * i as f64;
            tracker.append(&snapshot(c, None, 0.5), t0() + Duration::seconds(i));
        }
        tracker.reset();
        assert_eq!(tracker.history_len(), 0);
        assert_eq!(tracker.total_path_length(), 0.0);

        let kin = tracker.append(&snapshot(0.5, None, 0.5), t0());
        assert_eq!(kin.phase_label, PhaseLabel::WarmingUp);
    }

    #[test]
    fn test_active_transition_label() {
        let mut tracker = tracker();
        let mut kin = tracker.append(&snapshot(0.0, None, 0.2), t0());
        for i in 1..13 {
            let c = 0.06 * i as f64;
            kin = tracker.append(&snapshot(c, None, 0.2), t0() + Duration::seconds(i));
        }
        // steady 0.06/s climb: above velocity_high, below accel_high
        assert_eq!(kin.phase_label, PhaseLabel::ActiveTransition);
    }
}
