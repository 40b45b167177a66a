//! Core types for the Synheart Drift pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: interval samples, feature snapshots, trajectory state and
//! kinematics, mode classification, and the tick output record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single heartbeat-interval measurement.
///
/// Immutable once recorded. Owned exclusively by the interval buffer and
/// evicted oldest-first when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalSample {
    /// Beat-to-beat interval in milliseconds
    pub value_ms: u32,
    /// Arrival timestamp assigned by the transport layer
    pub timestamp: DateTime<Utc>,
}

/// Bucketed label for the rhythmic coupling score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouplingLabel {
    /// Buffer below the minimum sample count for the coupling estimate
    WarmingUp,
    Low,
    Emerging,
    Entrained,
    High,
}

impl CouplingLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouplingLabel::WarmingUp => "warming_up",
            CouplingLabel::Low => "low",
            CouplingLabel::Emerging => "emerging",
            CouplingLabel::Entrained => "entrained",
            CouplingLabel::High => "high",
        }
    }
}

/// Bucketed label for the single-tick legacy trend score.
///
/// Ordered from low arousal / low coupling to highest coupling. This is a
/// per-tick scalar tone, NOT the trajectory-level integrity score — the two
/// are kept apart in naming everywhere they surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendLabel {
    Scattered,
    Unsettled,
    Gathering,
    Aligned,
    Entrained,
}

impl TrendLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendLabel::Scattered => "scattered",
            TrendLabel::Unsettled => "unsettled",
            TrendLabel::Gathering => "gathering",
            TrendLabel::Aligned => "aligned",
            TrendLabel::Entrained => "entrained",
        }
    }
}

/// Scalar HRV features derived from the interval buffer on one tick.
///
/// Produced fresh each tick and never mutated afterwards. When the buffer is
/// below a function's minimum sample count the corresponding fields carry
/// sentinel values (zeros, `None`, `warming_up`) rather than being absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    /// max − min of buffered interval values (ms); 0 below 2 samples
    pub amplitude_ms: f64,
    /// Amplitude scaled by the configured ceiling, clamped to 0-1
    pub amplitude_norm: f64,
    /// Lag-based autocorrelation proxy for breath-linked HRV (0-1).
    /// A correlation-based proxy, not a phase-locking measurement.
    pub rhythmic_coupling_score: f64,
    pub rhythmic_coupling_label: CouplingLabel,
    /// Estimated breath rate (breaths/min); `None` when the peak structure
    /// is insufficient or implausible
    pub breath_rate_bpm: Option<f64>,
    /// Whether peak spacing was regular enough to call the breath steady
    pub breath_steady: bool,
    /// Normalized dispersion of successive differences (0-1); 0 for
    /// constant input
    pub volatility: f64,
    /// Weighted single-tick combination of coupling, breath steadiness,
    /// amplitude and inverse volatility. Single-tick scalar only.
    pub legacy_trend_score: f64,
    pub legacy_trend_label: TrendLabel,
    /// Number of samples the snapshot was computed from
    pub sample_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// A point in the normalized 3-axis trajectory space.
///
/// Axes: rhythmic coupling score, normalized breath rate (midpoint default
/// when absent), normalized amplitude. All components in 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrajectoryPosition(pub [f64; 3]);

impl TrajectoryPosition {
    /// Euclidean distance to another position
    pub fn distance(&self, other: &TrajectoryPosition) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// One trajectory history entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryState {
    pub position: TrajectoryPosition,
    pub timestamp: DateTime<Utc>,
}

/// Human-facing label for the current trajectory phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseLabel {
    /// Not enough history for kinematics yet
    WarmingUp,
    /// Low motion but inconsistent trajectory
    VigilantStillness,
    /// Sustained movement through the space
    ActiveTransition,
    /// Sharp direction change, coupling axis rising
    InflectionSeeking,
    /// Sharp direction change, coupling axis falling
    InflectionFromCoupling,
    /// Motion decaying toward a dwell
    Settling,
    /// Low motion, consistent trajectory, high coupling
    DwellingCoupled,
    /// Low motion, consistent trajectory, low coupling
    DwellingQuiet,
}

impl PhaseLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseLabel::WarmingUp => "warming up",
            PhaseLabel::VigilantStillness => "vigilant stillness",
            PhaseLabel::ActiveTransition => "active transition",
            PhaseLabel::InflectionSeeking => "inflection (seeking)",
            PhaseLabel::InflectionFromCoupling => "inflection (from-coupling)",
            PhaseLabel::Settling => "settling",
            PhaseLabel::DwellingCoupled => "dwelling (coupled)",
            PhaseLabel::DwellingQuiet => "dwelling (quiet)",
        }
    }
}

/// Kinematics of the feature trajectory at one tick.
///
/// All bounded-range fields are clamped post-computation; the clamps are a
/// last-resort invariant guard and their activation is logged as a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryKinematics {
    /// First-order finite difference of position over elapsed time
    pub velocity: [f64; 3],
    pub velocity_mag: f64,
    /// Magnitude of the finite-difference second derivative of position.
    /// An acceleration magnitude — not geometric curvature.
    pub acceleration_magnitude: f64,
    /// Bounded heuristic, monotonically decreasing in velocity and
    /// acceleration magnitude. A heuristic, not a dynamical-systems
    /// stability proof.
    pub stability: f64,
    /// Windowed self-similarity + direction consistency of the trajectory
    /// (0-1). Near-motionless trajectories map high by definition, so this
    /// score is structurally coupled to whatever drives low motion.
    pub trajectory_integrity: f64,
    /// Normalized path length traveled within the current history window
    /// only, over that window's own time span (0-1)
    pub windowed_path_signature: f64,
    pub phase_label: PhaseLabel,
}

/// Number of classification modes
pub const MODE_COUNT: usize = 6;

/// Named autonomic state modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Coherent,
    Entraining,
    Neutral,
    Activated,
    Strained,
    Quiescent,
}

impl Mode {
    /// All modes, in centroid-table order
    pub const ALL: [Mode; MODE_COUNT] = [
        Mode::Coherent,
        Mode::Entraining,
        Mode::Neutral,
        Mode::Activated,
        Mode::Strained,
        Mode::Quiescent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Coherent => "coherent",
            Mode::Entraining => "entraining",
            Mode::Neutral => "neutral",
            Mode::Activated => "activated",
            Mode::Strained => "strained",
            Mode::Quiescent => "quiescent",
        }
    }

    /// Index into centroid-ordered arrays
    pub fn index(&self) -> usize {
        Mode::ALL.iter().position(|m| m == self).unwrap_or(0)
    }
}

/// Probability-like membership weights over all modes, summing to 1.0
/// within floating-point tolerance. Recomputed fresh each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeMembership {
    weights: [f64; MODE_COUNT],
}

impl ModeMembership {
    pub fn new(weights: [f64; MODE_COUNT]) -> Self {
        Self { weights }
    }

    pub fn weight(&self, mode: Mode) -> f64 {
        self.weights[mode.index()]
    }

    /// Mode with the highest weight, and that weight
    pub fn argmax(&self) -> (Mode, f64) {
        let mut best = (Mode::ALL[0], self.weights[0]);
        for (i, &w) in self.weights.iter().enumerate().skip(1) {
            if w > best.1 {
                best = (Mode::ALL[i], w);
            }
        }
        best
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Stable name→weight map for the output boundary
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        Mode::ALL
            .iter()
            .map(|m| (m.as_str().to_string(), self.weight(*m)))
            .collect()
    }
}

/// One past classification, kept in the bounded mode history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeHistoryEntry {
    pub mode: Mode,
    pub timestamp: DateTime<Utc>,
    /// Membership weight of `mode` at the time of classification
    pub confidence: f64,
}

/// Hysteresis machine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HysteresisStatus {
    Unknown,
    Provisional,
    Established,
}

impl HysteresisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HysteresisStatus::Unknown => "unknown",
            HysteresisStatus::Provisional => "provisional",
            HysteresisStatus::Established => "established",
        }
    }
}

/// Live hysteresis state. Exactly one instance per session; the transition
/// rules in the classifier are its only mutator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HysteresisState {
    pub current_mode: Option<Mode>,
    pub status: HysteresisStatus,
    /// When the current mode was entered; `None` before the first tick
    pub entered_at: Option<DateTime<Utc>>,
}

impl Default for HysteresisState {
    fn default() -> Self {
        Self {
            current_mode: None,
            status: HysteresisStatus::Unknown,
            entered_at: None,
        }
    }
}

/// Direction of travel of the classified mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementAnnotation {
    /// Membership history too short to annotate
    Emerging,
    Settled,
    Approaching,
    Receding,
    Oscillating,
}

impl MovementAnnotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementAnnotation::Emerging => "emerging",
            MovementAnnotation::Settled => "settled",
            MovementAnnotation::Approaching => "approaching",
            MovementAnnotation::Receding => "receding",
            MovementAnnotation::Oscillating => "oscillating",
        }
    }
}

/// `metrics` section of the tick record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickMetrics {
    /// Amplitude (max − min) of buffered intervals, ms
    pub amp: f64,
    pub rhythmic_coupling_score: f64,
    pub rhythmic_coupling_label: CouplingLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breath_rate: Option<f64>,
    pub breath_steady: bool,
    pub volatility: f64,
    /// Single-tick trend scalar — distinct from `phase.trajectory_integrity`
    pub legacy_trend_score: f64,
    pub legacy_trend_label: TrendLabel,
}

/// `phase` section of the tick record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickPhase {
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub velocity_mag: f64,
    pub acceleration_magnitude: f64,
    pub stability: f64,
    pub trajectory_integrity: f64,
    pub windowed_path_signature: f64,
    pub phase_label: PhaseLabel,
}

/// `mode` section of the tick record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickMode {
    pub membership: BTreeMap<String, f64>,
    pub primary_mode: Mode,
    pub status: HysteresisStatus,
    /// Seconds the hysteresis machine has held the current mode
    pub dwell_time: f64,
    pub movement_annotation: MovementAnnotation,
    pub composed_label: String,
}

/// One composite output record per tick — the single boundary type every
/// downstream consumer (storage, delivery, replay) depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub ts: DateTime<Utc>,
    /// Passthrough heart-rate context supplied by the transport layer;
    /// never computed here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_context: Option<f64>,
    pub metrics: TickMetrics,
    pub phase: TickPhase,
    pub mode: TickMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_index_roundtrip() {
        for (i, mode) in Mode::ALL.iter().enumerate() {
            assert_eq!(mode.index(), i);
        }
    }

    #[test]
    fn test_membership_argmax() {
        let m = ModeMembership::new([0.1, 0.4, 0.2, 0.1, 0.1, 0.1]);
        let (mode, w) = m.argmax();
        assert_eq!(mode, Mode::Entraining);
        assert!((w - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_membership_map_has_all_modes() {
        let m = ModeMembership::new([1.0 / 6.0; MODE_COUNT]);
        let map = m.to_map();
        assert_eq!(map.len(), MODE_COUNT);
        assert!(map.contains_key("coherent"));
        assert!(map.contains_key("quiescent"));
    }

    #[test]
    fn test_position_distance() {
        let a = TrajectoryPosition([0.0, 0.0, 0.0]);
        let b = TrajectoryPosition([1.0, 0.0, 0.0]);
        assert!((a.distance(&b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&Mode::Coherent).unwrap();
        assert_eq!(json, "\"coherent\"");
    }
}
