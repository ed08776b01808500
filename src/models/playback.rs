use serde::{Deserialize, Serialize};

use crate::timeline::phase::PhaseLabel;

/// Playback health as seen by the presentation layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HealthState {
    Healthy,
    Buffering,
    Stalled,
    Recovering,
}

impl Default for HealthState {
    fn default() -> Self {
        HealthState::Healthy
    }
}

impl HealthState {
    /// Whether a "buffering/reconnecting" indicator should be shown.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, HealthState::Healthy)
    }
}

/// One locally observed tick of the media source. Only the latest is kept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSample {
    pub elapsed: f64,
    /// Seconds; `0.0` while unknown.
    pub total_duration: f64,
    pub health_state: HealthState,
}

/// Total duration learned from the growing manifest.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DurationEstimate {
    pub seconds: f64,
    /// Set once the manifest is complete; the value is fixed from then on.
    pub is_final: bool,
}

impl DurationEstimate {
    /// Folds a new observation in. Returns true when the estimate changed.
    pub fn observe(&mut self, seconds: f64, is_final: bool) -> bool {
        if self.is_final || !seconds.is_finite() {
            return false;
        }

        let mut changed = false;
        if seconds > self.seconds {
            self.seconds = seconds;
            changed = true;
        }
        if is_final {
            self.is_final = true;
            changed = true;
        }
        changed
    }

    pub fn is_known(&self) -> bool {
        self.seconds > 0.0
    }
}

/// A pause between two prayer groups, in elapsed-media seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntermissionWindow {
    pub start: f64,
    pub end: f64,
}

impl IntermissionWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, elapsed: f64) -> bool {
        elapsed >= self.start && elapsed < self.end
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SemanticPosition {
    /// 1-based, always within `[1, unit_count]`.
    pub unit_index: u32,
    pub time_within_unit: f64,
    pub phase_label: PhaseLabel,
    pub is_in_intermission: bool,
    /// Whole seconds left in the current intermission, if inside one.
    pub intermission_remaining: Option<u32>,
}

/// Advisory unit progress pushed by the server. Display aid only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressHint {
    pub current_unit: u32,
    pub total_units: u32,
}
