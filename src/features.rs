//! HRV feature derivation
//!
//! Pure functions over the interval buffer producing one `FeatureSnapshot`
//! per tick:
//! - amplitude (max − min) and its normalized form
//! - rhythmic coupling score: lag-set autocorrelation proxy
//! - breath rate estimate from interval peak spacing
//! - volatility of successive differences
//! - single-tick legacy trend score and label
//!
//! Never errors: below each function's minimum sample count the snapshot
//! carries documented sentinel values instead.

use crate::buffer::IntervalBuffer;
use crate::config::FeatureConfig;
use crate::types::{CouplingLabel, FeatureSnapshot, TrendLabel};
use chrono::{DateTime, Utc};

/// Coupling label bucket cut-points over the clamped score
const COUPLING_LOW_MAX: f64 = 0.30;
const COUPLING_EMERGING_MAX: f64 = 0.55;
const COUPLING_ENTRAINED_MAX: f64 = 0.80;

/// Legacy trend weights: coupling, breath steadiness, normalized
/// amplitude, inverse volatility
const TREND_W_COUPLING: f64 = 0.40;
const TREND_W_BREATH: f64 = 0.20;
const TREND_W_AMPLITUDE: f64 = 0.20;
const TREND_W_INV_VOLATILITY: f64 = 0.20;

/// Trend label bucket cut-points, ordered low arousal/low coupling →
/// highest coupling
const TREND_SCATTERED_MAX: f64 = 0.25;
const TREND_UNSETTLED_MAX: f64 = 0.45;
const TREND_GATHERING_MAX: f64 = 0.65;
const TREND_ALIGNED_MAX: f64 = 0.82;

/// Variance floor below which a sequence counts as constant
const VARIANCE_EPS: f64 = 1e-9;

/// Compute all HRV features from the current buffer contents.
pub fn compute_features(
    buffer: &IntervalBuffer,
    config: &FeatureConfig,
    timestamp: DateTime<Utc>,
) -> FeatureSnapshot {
    let values = buffer.values_ms();

    let amplitude_ms = compute_amplitude(&values);
    let amplitude_norm = (amplitude_ms / config.amplitude_ceiling_ms).clamp(0.0, 1.0);

    let coupling = compute_coupling_score(&values, config);
    let (rhythmic_coupling_score, rhythmic_coupling_label) = match coupling {
        Some(score) => (score, coupling_label(score)),
        None => (0.0, CouplingLabel::WarmingUp),
    };

    let (breath_rate_bpm, breath_steady) = estimate_breath(&values, config);
    let volatility = compute_volatility(&values, config.volatility_scale_ms);

    let legacy_trend_score = compute_trend_score(
        rhythmic_coupling_score,
        breath_steady,
        amplitude_norm,
        volatility,
    );
    let legacy_trend_label = trend_label(legacy_trend_score);

    FeatureSnapshot {
        amplitude_ms,
        amplitude_norm,
        rhythmic_coupling_score,
        rhythmic_coupling_label,
        breath_rate_bpm,
        breath_steady,
        volatility,
        legacy_trend_score,
        legacy_trend_label,
        sample_count: values.len(),
        timestamp,
    }
}

/// max − min of the buffered values; 0 below 2 samples
fn compute_amplitude(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    let min = values.iter().cloned().fold(f64::MAX, f64::min);
    max - min
}

/// Best lag-set autocorrelation of the interval sequence, clamped to 0-1.
///
/// Each lag is scored as the Pearson correlation between the sequence and
/// its lag-shifted self over the n−L overlapping pairs: covariance and both
/// variance terms are taken over the same lag-adjusted sample set, so the
/// pre-clamp value is the mathematically standard autocorrelation. Dividing
/// the terms by mismatched counts would inflate the raw value by n/(n−L) at
/// small buffer sizes; the clamp is not relied upon to mask that.
///
/// Returns `None` when no configured lag leaves at least
/// `coupling_min_overlap` pairs.
fn compute_coupling_score(values: &[f64], config: &FeatureConfig) -> Option<f64> {
    let n = values.len();
    let mut best: Option<f64> = None;

    for &lag in &config.coupling_lags {
        if n < lag + config.coupling_min_overlap {
            continue;
        }
        let r = lagged_autocorrelation(values, lag);
        best = Some(best.map_or(r, |b: f64| b.max(r)));
    }

    // Anti-correlation carries no coupling evidence; floor at zero.
    best.map(|r| r.clamp(0.0, 1.0))
}

/// Pearson correlation of `values[..n-lag]` against `values[lag..]`.
///
/// Both segments have the same length, and covariance and variances are all
/// normalized by that same count. Constant segments return 0.0.
fn lagged_autocorrelation(values: &[f64], lag: usize) -> f64 {
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
    cov /= m as f64;
    var_head /= m as f64;
    var_tail /= m as f64;

    if var_head < VARIANCE_EPS || var_tail < VARIANCE_EPS {
        return 0.0;
    }
    cov / (var_head * var_tail).sqrt()
}

/// Estimate breath rate from the dominant spacing between interval peaks.
///
/// A peak is a sample strictly greater than both neighbors. Requires the
/// configured minimum sample and peak counts, and the implied rate must
/// land inside the plausible breath band — a 2-beat pseudo-period from
/// alternating intervals fails that test and yields no estimate.
///
/// Steadiness is a boolean derived from the regularity of peak spacing
/// (coefficient of variation), not a continuous measure.
fn estimate_breath(values: &[f64], config: &FeatureConfig) -> (Option<f64>, bool) {
    if values.len() < config.breath_min_samples {
        return (None, false);
    }

    let mut peak_indices = Vec::new();
    for i in 1..values.len() - 1 {
        if values[i] > values[i - 1] && values[i] > values[i + 1] {
            peak_indices.push(i);
        }
    }
    if peak_indices.len() < config.breath_min_peaks {
        return (None, false);
    }

    let spacings: Vec<f64> = peak_indices
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) as f64)
        .collect();
    let mean_spacing = spacings.iter().sum::<f64>() / spacings.len() as f64;
    if mean_spacing <= 0.0 {
        return (None, false);
    }

    let mean_interval_sec = values.iter().sum::<f64>() / values.len() as f64 / 1000.0;
    let breath_period_sec = mean_spacing * mean_interval_sec;
    if breath_period_sec <= 0.0 {
        return (None, false);
    }
    let rate_bpm = 60.0 / breath_period_sec;

    if rate_bpm < config.breath_rate_min || rate_bpm > config.breath_rate_max {
        return (None, false);
    }

    let cv = std_dev(&spacings) / mean_spacing;
    (Some(rate_bpm), cv < config.breath_cv_max)
}

/// Normalized dispersion of successive differences.
///
/// Formula: `1 − exp(−rmssd / volatility_scale_ms)`, where RMSSD is the
/// root-mean-square of successive interval differences. 0 for constant
/// input; the configured scale maps to ~63% volatility.
fn compute_volatility(values: &[f64], scale_ms: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).powi(2))
        .sum();
    let rmssd = (sum_sq / (values.len() - 1) as f64).sqrt();
    (1.0 - (-rmssd / scale_ms).exp()).clamp(0.0, 1.0)
}

/// Weighted single-tick combination of the scalar features.
///
/// Formula:
/// ```text
/// trend = 0.40 * coupling
///       + 0.20 * breath_steady (0 or 1)
///       + 0.20 * amplitude_norm
///       + 0.20 * (1 - volatility)
/// ```
/// A per-tick scalar tone. It does not represent trajectory-level
/// integrity; that score lives in the trajectory tracker.
fn compute_trend_score(
    coupling: f64,
    breath_steady: bool,
    amplitude_norm: f64,
    volatility: f64,
) -> f64 {
    let steady = if breath_steady { 1.0 } else { 0.0 };
    let score = TREND_W_COUPLING * coupling
        + TREND_W_BREATH * steady
        + TREND_W_AMPLITUDE * amplitude_norm
        + TREND_W_INV_VOLATILITY * (1.0 - volatility);
    score.clamp(0.0, 1.0)
}

fn coupling_label(score: f64) -> CouplingLabel {
    if score < COUPLING_LOW_MAX {
        CouplingLabel::Low
    } else if score < COUPLING_EMERGING_MAX {
        CouplingLabel::Emerging
    } else if score < COUPLING_ENTRAINED_MAX {
        CouplingLabel::Entrained
    } else {
        CouplingLabel::High
    }
}

fn trend_label(score: f64) -> TrendLabel {
    if score < TREND_SCATTERED_MAX {
        TrendLabel::Scattered
    } else if score < TREND_UNSETTLED_MAX {
        TrendLabel::Unsettled
    } else if score < TREND_GATHERING_MAX {
        TrendLabel::Gathering
    } else if score < TREND_ALIGNED_MAX {
        TrendLabel::Aligned
    } else {
        TrendLabel::Entrained
    }
}

/// Standard deviation of a slice of values.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn buffer_of(values: &[u32]) -> IntervalBuffer {
        let mut buffer = IntervalBuffer::new(&BufferConfig::default());
        for (i, &v) in values.iter().enumerate() {
            buffer.push(v, t0() + Duration::seconds(i as i64)).unwrap();
        }
        buffer
    }

    /// RR series with an exact 6-beat rhythm, phase-shifted so each cycle
    /// has a unique local maximum.
    fn entrained_series(n: usize) -> Vec<u32> {
        (0..n)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * (i as f64 + 0.5) / 6.0;
                (800.0 + 50.0 * phase.sin()).round() as u32
            })
            .collect()
    }

    #[test]
    fn test_constant_buffer_zero_amplitude_and_volatility() {
        let buffer = buffer_of(&[1000; 30]);
        let snapshot = compute_features(&buffer, &FeatureConfig::default(), t0());

        assert_eq!(snapshot.amplitude_ms, 0.0);
        assert_eq!(snapshot.volatility, 0.0);
        // Zero variance carries no rhythm
        assert!(snapshot.rhythmic_coupling_score < 1e-9);
    }

    #[test]
    fn test_empty_buffer_is_sentinel_not_error() {
        let buffer = IntervalBuffer::new(&BufferConfig::default());
        let snapshot = compute_features(&buffer, &FeatureConfig::default(), t0());

        assert_eq!(snapshot.amplitude_ms, 0.0);
        assert_eq!(snapshot.rhythmic_coupling_label, CouplingLabel::WarmingUp);
        assert_eq!(snapshot.breath_rate_bpm, None);
        assert_eq!(snapshot.sample_count, 0);
    }

    #[test]
    fn test_coupling_score_in_bounds() {
        let buffer = buffer_of(&[810, 790, 835, 801, 770, 820, 795, 840, 805, 780, 825, 798, 812,
            788, 833, 807, 772, 818, 793, 842]);
        let snapshot = compute_features(&buffer, &FeatureConfig::default(), t0());
        assert!(snapshot.rhythmic_coupling_score >= 0.0);
        assert!(snapshot.rhythmic_coupling_score <= 1.0);
    }

    #[test]
    fn test_no_lag_inflation_on_linear_input() {
        // A linear ramp correlates perfectly with its own shift at any lag:
        // the standard autocorrelation is exactly 1.0. A mismatched-count
        // normalization would exceed 1.0 pre-clamp here.
        let values: Vec<f64> = (0..40).map(|i| 800.0 + i as f64).collect();
        for lag in [3usize, 8] {
            let r = lagged_autocorrelation(&values, lag);
            assert!(
                (r - 1.0).abs() < 1e-9,
                "lag {} expected standard value 1.0, got {}",
                lag,
                r
            );
        }
    }

    #[test]
    fn test_entrained_series_scores_high() {
        let buffer = buffer_of(&entrained_series(36));
        let snapshot = compute_features(&buffer, &FeatureConfig::default(), t0());

        // Period-6 rhythm is caught exactly at lag 6
        assert!(snapshot.rhythmic_coupling_score > 0.95);
        assert_eq!(snapshot.rhythmic_coupling_label, CouplingLabel::High);
        // ~0.8 s beats, 6-beat breath cycle: 12.5 breaths/min, perfectly regular
        let rate = snapshot.breath_rate_bpm.expect("breath rate");
        assert!((rate - 12.5).abs() < 1.0, "rate {}", rate);
        assert!(snapshot.breath_steady);
    }

    #[test]
    fn test_alternating_series_volatile_and_unsteady() {
        // [800, 850] × 32: the 2-beat pseudo-period implies a breath rate
        // far above the plausible band, so no estimate and not steady.
        let values: Vec<u32> = (0..64).map(|i| if i % 2 == 0 { 800 } else { 850 }).collect();
        let buffer = buffer_of(&values);
        let snapshot = compute_features(&buffer, &FeatureConfig::default(), t0());

        assert!(snapshot.volatility > 0.0);
        assert_eq!(snapshot.breath_rate_bpm, None);
        assert!(!snapshot.breath_steady);
    }

    #[test]
    fn test_volatility_saturation_formula() {
        // Alternating ±50 ms: RMSSD = 50 = scale, so volatility = 1 − e⁻¹
        let values: Vec<u32> = (0..32).map(|i| if i % 2 == 0 { 800 } else { 850 }).collect();
        let buffer = buffer_of(&values);
        let snapshot = compute_features(&buffer, &FeatureConfig::default(), t0());
        assert!((snapshot.volatility - (1.0 - (-1.0f64).exp())).abs() < 0.001);
    }

    #[test]
    fn test_trend_weights() {
        // All components at max: 0.4 + 0.2 + 0.2 + 0.2 = 1.0
        assert!((compute_trend_score(1.0, true, 1.0, 0.0) - 1.0).abs() < 1e-9);
        // Coupling alone contributes its weight
        assert!((compute_trend_score(1.0, false, 0.0, 1.0) - TREND_W_COUPLING).abs() < 1e-9);
    }

    #[test]
    fn test_trend_label_ordering() {
        assert_eq!(trend_label(0.1), TrendLabel::Scattered);
        assert_eq!(trend_label(0.3), TrendLabel::Unsettled);
        assert_eq!(trend_label(0.5), TrendLabel::Gathering);
        assert_eq!(trend_label(0.7), TrendLabel::Aligned);
        assert_eq!(trend_label(0.9), TrendLabel::Entrained);
    }

    #[test]
    fn test_coupling_label_buckets() {
        assert_eq!(coupling_label(0.1), CouplingLabel::Low);
        assert_eq!(coupling_label(0.4), CouplingLabel::Emerging);
        assert_eq!(coupling_label(0.7), CouplingLabel::Entrained);
        assert_eq!(coupling_label(0.9), CouplingLabel::High);
    }
}
