//! Movement annotation
//!
//! A pure layer over the classifier output describing whether the
//! classified mode is being approached, receded from, oscillated around,
//! or settled into — and the composed human-facing label.
//!
//! The annotation's derivative is computed from the primary mode's own
//! membership series in the mode history (the soft membership trajectory
//! being annotated). The legacy scalar trend, when present, is accepted for
//! interface parity but never differentiated — annotating this signal with
//! another signal's derivative can contradict the membership's actual
//! direction of travel.

use crate::config::AnnotatorConfig;
use crate::types::{HysteresisState, Mode, ModeHistoryEntry, ModeMembership, MovementAnnotation};
use std::collections::VecDeque;

/// Annotate the movement of the currently classified mode.
pub fn annotate_movement(
    _membership: &ModeMembership,
    state: &HysteresisState,
    history: &VecDeque<ModeHistoryEntry>,
    _legacy_trend: Option<f64>,
    config: &AnnotatorConfig,
) -> (MovementAnnotation, String) {
    let primary = match state.current_mode {
        Some(mode) => mode,
        None => {
            return (
                MovementAnnotation::Emerging,
                MovementAnnotation::Emerging.as_str().to_string(),
            )
        }
    };

    let annotation = classify_movement(primary, history, config);
    (annotation, compose_label(primary, annotation))
}

/// Movement classification from the primary mode's membership series.
fn classify_movement(
    primary: Mode,
    history: &VecDeque<ModeHistoryEntry>,
    config: &AnnotatorConfig,
) -> MovementAnnotation {
    // Last `window_entries` classifications of the primary mode, in order
    let series: Vec<&ModeHistoryEntry> = history
        .iter()
        .rev()
        .take(config.window_entries)
        .filter(|e| e.mode == primary)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    if series.len() < config.min_entries {
        return MovementAnnotation::Emerging;
    }

    // Oscillation: repeated sign flips in the membership differences
    let mut sign_changes = 0;
    let mut last_sign = 0i8;
    for pair in series.windows(2) {
        let diff = pair[1].confidence - pair[0].confidence;
        if diff.abs() < config.slope_eps {
            continue;
        }
        let sign = if diff > 0.0 { 1 } else { -1 };
        if last_sign != 0 && sign != last_sign {
            sign_changes += 1;
        }
        last_sign = sign;
    }
    if sign_changes >= 2 {
        return MovementAnnotation::Oscillating;
    }

    let slope = membership_slope(&series);
    if slope > config.slope_eps {
        MovementAnnotation::Approaching
    } else if slope < -config.slope_eps {
        MovementAnnotation::Receding
    } else {
        MovementAnnotation::Settled
    }
}

/// Least-squares slope of membership confidence over time (per second)
fn membership_slope(series: &[&ModeHistoryEntry]) -> f64 {
    let n = series.len() as f64;
    let t0 = series[0].timestamp;
    let xs: Vec<f64> = series
        .iter()
        .map(|e| (e.timestamp - t0).num_milliseconds() as f64 / 1000.0)
        .collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = series.iter().map(|e| e.confidence).sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (x, entry) in xs.iter().zip(series.iter()) {
        num += (x - mean_x) * (entry.confidence - mean_y);
        den += (x - mean_x).powi(2);
    }
    if den <= 0.0 {
        return 0.0;
    }
    num / den
}

/// Compose the final label. The `settled` qualifier is redundant once a
/// mode is held and is omitted; every other annotation is appended.
fn compose_label(primary: Mode, annotation: MovementAnnotation) -> String {
    match annotation {
        MovementAnnotation::Settled => primary.as_str().to_string(),
        other => format!("{} ({})", primary.as_str(), other.as_str()),
    }
}
