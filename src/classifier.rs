//! Mode classification
//!
//! Two deliberately decoupled parts:
//! - `soft_membership`: a pure, stateless membership function — weighted
//!   squared Euclidean distance to each mode centroid, softened with a
//!   temperature-scaled softmax into weights summing to 1.
//! - `ModeClassifier`: the stateful hysteresis machine
//!   (`unknown → provisional → established`) with asymmetric entry/exit
//!   thresholds, an entry penalty for low-confidence entries, a designated
//!   fallback mode, and a bounded history of past classifications.

use crate::config::{ClassifierConfig, DriftConfig};
use crate::types::{
    FeatureSnapshot, HysteresisState, HysteresisStatus, Mode, ModeHistoryEntry, ModeMembership,
    MODE_COUNT,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// Membership feature vector: rhythmic coupling score, breath steadiness
/// (binary), normalized amplitude, inverse volatility.
pub fn membership_features(snapshot: &FeatureSnapshot) -> [f64; 4] {
    [
        snapshot.rhythmic_coupling_score,
        if snapshot.breath_steady { 1.0 } else { 0.0 },
        snapshot.amplitude_norm,
        1.0 - snapshot.volatility,
    ]
}

/// Soft membership of a feature vector against the configured centroids.
///
/// Weighted squared Euclidean distance per mode, then `softmax(−d/T)`.
/// Weights always sum to 1.0 within floating-point tolerance.
pub fn soft_membership(features: &[f64; 4], config: &ClassifierConfig) -> ModeMembership {
    let mut neg_scaled = [0.0; MODE_COUNT];
    for (i, centroid) in config.centroids.iter().enumerate() {
        let c = centroid.as_array();
        let mut distance = 0.0;
        for axis in 0..4 {
            let diff = features[axis] - c[axis];
            distance += config.axis_weights[axis] * diff * diff;
        }
        neg_scaled[i] = -distance / config.temperature;
    }

    // Max-shifted softmax for numerical stability
    let max = neg_scaled.iter().cloned().fold(f64::MIN, f64::max);
    let mut weights = [0.0; MODE_COUNT];
    let mut sum = 0.0;
    for i in 0..MODE_COUNT {
        weights[i] = (neg_scaled[i] - max).exp();
        sum += weights[i];
    }
    for w in weights.iter_mut() {
        *w /= sum;
    }
    ModeMembership::new(weights)
}

/// Classification result for one tick
#[derive(Debug, Clone)]
pub struct ClassifierOutput {
    pub membership: ModeMembership,
    pub state: HysteresisState,
    /// Seconds the current mode has been held
    pub dwell_time_sec: f64,
}

/// Stateful hysteresis machine over soft memberships.
///
/// A candidate mode must exceed its entry threshold to move toward
/// `established`; an established mode only degrades when its membership
/// falls below the (lower) exit threshold. When the top candidate fails
/// entry, the machine falls back to the configured default mode rather than
/// oscillating between near-ties.
#[derive(Debug, Clone)]
pub struct ModeClassifier {
    config: ClassifierConfig,
    hysteresis: HysteresisState,
    history: VecDeque<ModeHistoryEntry>,
    /// Consecutive qualifying ticks for the current provisional mode
    qualifying_streak: u32,
    /// Qualifying ticks needed for promotion (entry penalty included)
    required_streak: u32,
    /// Mode-to-mode transitions this session
    transitions: u64,
}

impl ModeClassifier {
    pub fn new(config: &DriftConfig) -> Self {
        Self {
            config: config.classifier.clone(),
            hysteresis: HysteresisState::default(),
            history: VecDeque::with_capacity(config.classifier.history_capacity),
            qualifying_streak: 0,
            required_streak: config.classifier.establish_ticks,
            transitions: 0,
        }
    }

    /// Run one classification tick and update the hysteresis state.
    pub fn classify(&mut self, snapshot: &FeatureSnapshot, now: DateTime<Utc>) -> ClassifierOutput {
        let membership = soft_membership(&membership_features(snapshot), &self.config);
        let (candidate, confidence) = membership.argmax();

        match self.hysteresis.current_mode {
            None => {
                if confidence > self.config.entry_threshold {
                    self.enter(candidate, confidence, now);
                } else {
                    self.enter(self.config.default_mode, confidence, now);
                }
            }
            Some(current) => {
                let current_weight = membership.weight(current);
                if candidate == current {
                    if confidence > self.config.entry_threshold {
                        self.qualifying_streak += 1;
                        if self.hysteresis.status == HysteresisStatus::Provisional
                            && self.qualifying_streak >= self.required_streak
                        {
                            debug!(mode = current.as_str(), "mode established");
                            self.hysteresis.status = HysteresisStatus::Established;
                        }
                    } else {
                        self.hold_or_degrade(current, current_weight, confidence, now);
                    }
                } else if self.hysteresis.status == HysteresisStatus::Established
                    && current_weight >= self.config.exit_threshold
                {
                    // Hysteresis holds: the established mode keeps the label
                    // until it falls below its own exit threshold.
                    self.qualifying_streak = 0;
                } else if confidence > self.config.entry_threshold {
                    self.enter(candidate, confidence, now);
                } else {
                    self.hold_or_degrade(current, current_weight, confidence, now);
                }
            }
        }

        // Record the classification; cleared only on explicit session reset.
        let recorded_mode = self.hysteresis.current_mode.unwrap_or(self.config.default_mode);
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(ModeHistoryEntry {
            mode: recorded_mode,
            timestamp: now,
            confidence: membership.weight(recorded_mode),
        });

        ClassifierOutput {
            membership,
            state: self.hysteresis,
            dwell_time_sec: self.dwell_time_sec(now),
        }
    }

    /// Seconds since the current mode was entered
    pub fn dwell_time_sec(&self, now: DateTime<Utc>) -> f64 {
        match self.hysteresis.entered_at {
            Some(entered) => ((now - entered).num_milliseconds() as f64 / 1000.0).max(0.0),
            None => 0.0,
        }
    }

    pub fn hysteresis(&self) -> HysteresisState {
        self.hysteresis
    }

    pub fn history(&self) -> &VecDeque<ModeHistoryEntry> {
        &self.history
    }

    /// Mode-to-mode transitions observed this session (diagnostic)
    pub fn transition_count(&self) -> u64 {
        self.transitions
    }

    /// Clear hysteresis and history; used only at session boundaries.
    pub fn reset(&mut self) {
        self.hysteresis = HysteresisState::default();
        self.history.clear();
        self.qualifying_streak = 0;
        self.required_streak = self.config.establish_ticks;
        self.transitions = 0;
    }

    /// Enter `mode` (provisionally). Entering the mode already held only
    /// refreshes the status; dwell keeps counting from the original entry.
    fn enter(&mut self, mode: Mode, confidence: f64, now: DateTime<Utc>) {
        if self.hysteresis.current_mode != Some(mode) {
            if self.hysteresis.current_mode.is_some() {
                self.transitions += 1;
            }
            self.hysteresis.current_mode = Some(mode);
            self.hysteresis.entered_at = Some(now);
            // Entry penalty: a low-confidence entry must hold the argmax
            // longer before it establishes.
            let penalized =
                confidence < self.config.entry_threshold + self.config.entry_confidence_margin;
            self.required_streak = self.config.establish_ticks
                + if penalized {
                    self.config.entry_penalty_ticks
                } else {
                    0
                };
            self.qualifying_streak = u32::from(confidence > self.config.entry_threshold);
        }
        self.hysteresis.status = HysteresisStatus::Provisional;
    }

    /// The current mode failed to qualify this tick: hold it while its own
    /// membership stays above the exit threshold, otherwise degrade (and
    /// fall back to the default mode when even that fails).
    fn hold_or_degrade(
        &mut self,
        current: Mode,
        current_weight: f64,
        confidence: f64,
        now: DateTime<Utc>,
    ) {
        if current_weight >= self.config.exit_threshold {
            self.qualifying_streak = 0;
            return;
        }
        match self.hysteresis.status {
            HysteresisStatus::Established => {
                debug!(mode = current.as_str(), weight = current_weight, "mode degraded");
                self.hysteresis.status = HysteresisStatus::Provisional;
                self.qualifying_streak = 0;
            }
            _ => {
                if current != self.config.default_mode {
                    self.enter(self.config.default_mode, confidence, now);
                } else {
                    self.qualifying_streak = 0;
                }
            }
        }
    }
}
