//! Session configuration
//!
//! Every tunable of the pipeline is enumerated here with documented defaults
//! and valid ranges: buffer capacity, coupling lags, normalization ceilings,
//! trajectory window sizes, centroids, thresholds, and softmax temperature.
//! The structure is versioned and serializable, replacing any ad-hoc
//! key/value passing at the boundary.

use crate::error::DriftError;
use crate::types::{Mode, MODE_COUNT};
use serde::{Deserialize, Serialize};

/// Current configuration schema version
pub const CONFIG_VERSION: &str = "drift.config.v1";

/// Uniform baseline membership weight (1 / number of modes)
pub const UNIFORM_BASELINE: f64 = 1.0 / MODE_COUNT as f64;

/// Interval buffer tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Fixed window capacity in samples; oldest evicted on overflow
    pub capacity: usize,
    /// Minimum plausible beat-to-beat interval (ms)
    pub min_interval_ms: u32,
    /// Maximum plausible beat-to-beat interval (ms)
    pub max_interval_ms: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            min_interval_ms: 250,
            max_interval_ms: 3000,
        }
    }
}

/// HRV feature engine tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Autocorrelation lags in beats, covering typical respiratory-cycle
    /// beat counts
    pub coupling_lags: Vec<usize>,
    /// Minimum overlapping pairs required at the largest lag
    pub coupling_min_overlap: usize,
    /// Reserved: adapt the lag set to the estimated breath rate. Currently
    /// unused — the static `coupling_lags` set is always applied.
    pub adapt_lags_to_breath: bool,
    /// Amplitude normalization ceiling (ms); amplitudes at or above this
    /// map to 1.0
    pub amplitude_ceiling_ms: f64,
    /// RMSSD scale (ms) for the volatility saturation curve
    pub volatility_scale_ms: f64,
    /// Minimum samples before a breath estimate is attempted
    pub breath_min_samples: usize,
    /// Minimum detected peaks for a breath estimate
    pub breath_min_peaks: usize,
    /// Plausible breath band, breaths per minute
    pub breath_rate_min: f64,
    pub breath_rate_max: f64,
    /// Peak-spacing coefficient of variation below which breathing is
    /// called steady
    pub breath_cv_max: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            coupling_lags: vec![3, 4, 5, 6, 7, 8],
            coupling_min_overlap: 8,
            adapt_lags_to_breath: false,
            amplitude_ceiling_ms: 200.0,
            volatility_scale_ms: 50.0,
            breath_min_samples: 16,
            breath_min_peaks: 3,
            breath_rate_min: 4.0,
            breath_rate_max: 30.0,
            breath_cv_max: 0.25,
        }
    }
}

/// Trajectory tracker tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    /// Bounded history capacity in states (~seconds at 1 Hz ticks)
    pub history_capacity: usize,
    /// States required before phase labels leave "warming up"
    pub warmup_min_states: usize,
    /// Velocity samples required before integrity is computed (the shared
    /// default is used below this)
    pub integrity_min_velocities: usize,
    /// Lag (in states) for the direction-consistency cosine term
    pub integrity_direction_lag: usize,
    /// Path-rate scale (position units/s) for the windowed path signature
    /// saturation curve
    pub path_rate_scale: f64,
    /// Velocity magnitude (units/s) below which the trajectory counts as
    /// still
    pub velocity_low: f64,
    /// Velocity magnitude above which the trajectory counts as in motion
    pub velocity_high: f64,
    /// Acceleration magnitude (units/s²) above which a direction change is
    /// an inflection
    pub accel_high: f64,
    /// Integrity at or above this counts as a consistent trajectory
    pub integrity_high: f64,
    /// Coupling-axis position at or above this makes a dwell "coupled"
    pub coupling_dwell_min: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            history_capacity: 30,
            warmup_min_states: 5,
            integrity_min_velocities: 8,
            integrity_direction_lag: 2,
            path_rate_scale: 0.05,
            velocity_low: 0.005,
            velocity_high: 0.03,
            accel_high: 0.02,
            integrity_high: 0.65,
            coupling_dwell_min: 0.55,
        }
    }
}

/// Fixed reference point for one mode in the 4-dimensional membership
/// feature space.
///
/// `breath_steady` is binary in practice (the steadiness indicator has only
/// two realizable values), so every centroid places it at exactly 0.0 or
/// 1.0 — an interpolated coordinate there would make the mode permanently
/// farther from every real input than intended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub coupling: f64,
    pub breath_steady: f64,
    pub amplitude_norm: f64,
    pub inverse_volatility: f64,
}

impl Centroid {
    pub fn as_array(&self) -> [f64; 4] {
        [
            self.coupling,
            self.breath_steady,
            self.amplitude_norm,
            self.inverse_volatility,
        ]
    }
}

/// Mode classifier tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Centroids in `Mode::ALL` order
    pub centroids: [Centroid; MODE_COUNT],
    /// Per-axis weights for the squared Euclidean membership distance
    pub axis_weights: [f64; 4],
    /// Softmax temperature; lower concentrates weight near the closest
    /// centroid. Tune together with the thresholds — the reachability
    /// check must keep passing.
    pub temperature: f64,
    /// Membership a candidate must exceed to move toward established.
    /// Must be above both the exit threshold and the uniform baseline.
    pub entry_threshold: f64,
    /// Membership below which an established mode degrades
    pub exit_threshold: f64,
    /// Consecutive qualifying ticks to promote provisional → established
    pub establish_ticks: u32,
    /// Extra qualifying ticks required when the first qualifying
    /// confidence is within `entry_confidence_margin` of the entry
    /// threshold
    pub entry_penalty_ticks: u32,
    pub entry_confidence_margin: f64,
    /// Fallback when the top candidate fails its entry threshold
    pub default_mode: Mode,
    /// Bounded mode-history capacity in entries
    pub history_capacity: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            centroids: [
                // Coherent: strong coupling, steady breath, full amplitude
                Centroid {
                    coupling: 0.85,
                    breath_steady: 1.0,
                    amplitude_norm: 0.70,
                    inverse_volatility: 0.85,
                },
                // Entraining: coupling building, breath already steady
                Centroid {
                    coupling: 0.55,
                    breath_steady: 1.0,
                    amplitude_norm: 0.50,
                    inverse_volatility: 0.65,
                },
                // Neutral: the designated fallback
                Centroid {
                    coupling: 0.30,
                    breath_steady: 0.0,
                    amplitude_norm: 0.35,
                    inverse_volatility: 0.55,
                },
                // Activated: high amplitude, irregular, volatile
                Centroid {
                    coupling: 0.20,
                    breath_steady: 0.0,
                    amplitude_norm: 0.65,
                    inverse_volatility: 0.25,
                },
                // Strained: suppressed amplitude, high volatility
                Centroid {
                    coupling: 0.10,
                    breath_steady: 0.0,
                    amplitude_norm: 0.20,
                    inverse_volatility: 0.15,
                },
                // Quiescent: flat, quiet, steady
                Centroid {
                    coupling: 0.15,
                    breath_steady: 1.0,
                    amplitude_norm: 0.10,
                    inverse_volatility: 0.80,
                },
            ],
            axis_weights: [2.0, 1.0, 1.0, 1.5],
            temperature: 0.10,
            entry_threshold: 0.40,
            exit_threshold: 0.28,
            establish_ticks: 4,
            entry_penalty_ticks: 2,
            entry_confidence_margin: 0.10,
            default_mode: Mode::Neutral,
            history_capacity: 100,
        }
    }
}

/// Movement annotator tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatorConfig {
    /// Mode-history window (entries) the annotation is derived from
    pub window_entries: usize,
    /// Entries required before annotating anything but "emerging"
    pub min_entries: usize,
    /// Membership slope (per second) below which the mode counts as
    /// settled
    pub slope_eps: f64,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            window_entries: 8,
            min_entries: 4,
            slope_eps: 0.005,
        }
    }
}

/// Complete, versioned session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Configuration schema version
    pub version: String,
    pub buffer: BufferConfig,
    pub features: FeatureConfig,
    pub trajectory: TrajectoryConfig,
    pub classifier: ClassifierConfig,
    pub annotator: AnnotatorConfig,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            buffer: BufferConfig::default(),
            features: FeatureConfig::default(),
            trajectory: TrajectoryConfig::default(),
            classifier: ClassifierConfig::default(),
            annotator: AnnotatorConfig::default(),
        }
    }
}

impl DriftConfig {
    /// Check every tunable against its valid range.
    pub fn validate(&self) -> Result<(), DriftError> {
        let invalid = |msg: String| Err(DriftError::InvalidConfig(msg));

        if self.buffer.capacity < 2 {
            return invalid(format!(
                "buffer.capacity must be >= 2, got {}",
                self.buffer.capacity
            ));
        }
        if self.buffer.min_interval_ms == 0
            || self.buffer.min_interval_ms >= self.buffer.max_interval_ms
        {
            return invalid(format!(
                "buffer interval bounds must satisfy 0 < min < max, got {}..{}",
                self.buffer.min_interval_ms, self.buffer.max_interval_ms
            ));
        }

        if self.features.coupling_lags.is_empty() {
            return invalid("features.coupling_lags must not be empty".into());
        }
        if self.features.coupling_lags.iter().any(|&l| l == 0) {
            return invalid("features.coupling_lags must be >= 1".into());
        }
        if self.features.coupling_min_overlap < 2 {
            return invalid("features.coupling_min_overlap must be >= 2".into());
        }
        if self.features.amplitude_ceiling_ms <= 0.0 {
            return invalid("features.amplitude_ceiling_ms must be positive".into());
        }
        if self.features.volatility_scale_ms <= 0.0 {
            return invalid("features.volatility_scale_ms must be positive".into());
        }
        if self.features.breath_rate_min <= 0.0
            || self.features.breath_rate_min >= self.features.breath_rate_max
        {
            return invalid(format!(
                "breath band must satisfy 0 < min < max, got {}..{}",
                self.features.breath_rate_min, self.features.breath_rate_max
            ));
        }
        if !(0.0..=1.0).contains(&self.features.breath_cv_max) {
            return invalid("features.breath_cv_max must be in [0, 1]".into());
        }

        if self.trajectory.history_capacity < 3 {
            return invalid("trajectory.history_capacity must be >= 3".into());
        }
        if self.trajectory.integrity_direction_lag == 0 {
            return invalid("trajectory.integrity_direction_lag must be >= 1".into());
        }
        if self.trajectory.path_rate_scale <= 0.0 {
            return invalid("trajectory.path_rate_scale must be positive".into());
        }
        if self.trajectory.velocity_low >= self.trajectory.velocity_high {
            return invalid("trajectory velocity bands must satisfy low < high".into());
        }

        let c = &self.classifier;
        if c.temperature <= 0.0 {
            return invalid("classifier.temperature must be positive".into());
        }
        if c.axis_weights.iter().any(|&w| w <= 0.0) {
            return invalid("classifier.axis_weights must all be positive".into());
        }
        // Entry > exit, both above the uniform baseline 1/6.
        if c.entry_threshold <= c.exit_threshold {
            return invalid(format!(
                "entry threshold {} must exceed exit threshold {}",
                c.entry_threshold, c.exit_threshold
            ));
        }
        if c.exit_threshold <= UNIFORM_BASELINE || c.entry_threshold >= 1.0 {
            return invalid(format!(
                "thresholds must lie in ({:.3}, 1.0), got entry {} exit {}",
                UNIFORM_BASELINE, c.entry_threshold, c.exit_threshold
            ));
        }
        if c.establish_ticks == 0 {
            return invalid("classifier.establish_ticks must be >= 1".into());
        }
        if c.history_capacity == 0 {
            return invalid("classifier.history_capacity must be >= 1".into());
        }
        for (mode, centroid) in Mode::ALL.iter().zip(c.centroids.iter()) {
            for (axis, value) in ["coupling", "breath_steady", "amplitude", "inverse_volatility"]
                .iter()
                .zip(centroid.as_array().iter())
            {
                if !(0.0..=1.0).contains(value) {
                    return invalid(format!(
                        "centroid {} axis {} out of [0, 1]: {}",
                        mode.as_str(),
                        axis,
                        value
                    ));
                }
            }
            // The steadiness axis is binary in practice; an interpolated
            // centroid coordinate there is unreachable by any real input.
            if centroid.breath_steady != 0.0 && centroid.breath_steady != 1.0 {
                return invalid(format!(
                    "centroid {} places breath_steady at {} — must be exactly 0.0 or 1.0",
                    mode.as_str(),
                    centroid.breath_steady
                ));
            }
        }

        if self.annotator.window_entries < 2 || self.annotator.min_entries < 2 {
            return invalid("annotator windows must be >= 2 entries".into());
        }
        if self.annotator.min_entries > self.annotator.window_entries {
            return invalid("annotator.min_entries must not exceed window_entries".into());
        }

        Ok(())
    }

    /// Verify that every mode is reachable under this configuration:
    /// membership computed at each centroid's own position must clear that
    /// mode's entry threshold. A failure here is a calibration error to fix
    /// at design time, never to discover in production.
    pub fn verify_mode_reachability(&self) -> Result<(), DriftError> {
        for (mode, centroid) in Mode::ALL.iter().zip(self.classifier.centroids.iter()) {
            let membership =
                crate::classifier::soft_membership(&centroid.as_array(), &self.classifier);
            let self_weight = membership.weight(*mode);
            if self_weight <= self.classifier.entry_threshold {
                return Err(DriftError::UnreachableMode {
                    mode: mode.as_str().to_string(),
                    membership: self_weight,
                    entry: self.classifier.entry_threshold,
                });
            }
        }
        Ok(())
    }

    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, DriftError> {
        let config: DriftConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, DriftError> {
        serde_json::to_string_pretty(self).map_err(DriftError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DriftConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_reachable() {
        let config = DriftConfig::default();
        assert!(config.verify_mode_reachability().is_ok());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = DriftConfig::default();
        config.classifier.entry_threshold = 0.2;
        config.classifier.exit_threshold = 0.3;
        assert!(matches!(
            config.validate(),
            Err(DriftError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_threshold_below_uniform_baseline() {
        let mut config = DriftConfig::default();
        config.classifier.exit_threshold = 0.1; // below 1/6
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_interpolated_steadiness_centroid() {
        let mut config = DriftConfig::default();
        config.classifier.centroids[0].breath_steady = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_lag_set() {
        let mut config = DriftConfig::default();
        config.features.coupling_lags.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = DriftConfig::default();
        let json = config.to_json().unwrap();
        let loaded = DriftConfig::from_json(&json).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_unreachable_mode_detected() {
        let mut config = DriftConfig::default();
        // Flatten the temperature until softmax is near-uniform: every
        // self-membership collapses toward 1/6, under the entry threshold.
        config.classifier.temperature = 50.0;
        assert!(matches!(
            config.verify_mode_reachability(),
            Err(DriftError::UnreachableMode { .. })
        ));
    }
}
