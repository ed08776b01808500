use serde::{Deserialize, Serialize};

use super::phase::PhaseLabel;

/// One step of a unit. `seconds == None` marks the variable recitation step
/// that absorbs whatever the fixed steps leave over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSegment {
    pub label: PhaseLabel,
    pub seconds: Option<f64>,
}

impl PhaseSegment {
    pub fn fixed(label: PhaseLabel, seconds: f64) -> Self {
        Self {
            label,
            seconds: Some(seconds),
        }
    }

    pub fn variable(label: PhaseLabel) -> Self {
        Self {
            label,
            seconds: None,
        }
    }
}

/// Segment budget for one reciter/encoding. The durations are tuned against
/// the assembled audio, so they live in settings rather than in code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentProfile {
    /// Segments of the first unit of a group (carries the opening takbeer).
    pub first_of_group: Vec<PhaseSegment>,
    /// Segments of the second unit (ends in the sitting tashahhud).
    pub second_of_group: Vec<PhaseSegment>,
}

impl Default for SegmentProfile {
    fn default() -> Self {
        use PhaseLabel::*;

        // Takbeer 2s, ruku takbeer+dhikr 12s, qawmah+tahmid 6s, each sujood
        // takbeer+dhikr 10s, jilsah takbeer+pause 5s, tashahhud takbeer+30s.
        Self {
            first_of_group: vec![
                PhaseSegment::fixed(OpeningTakbeer, 2.0),
                PhaseSegment::variable(Recitation),
                PhaseSegment::fixed(Ruku, 12.0),
                PhaseSegment::fixed(Qawmah, 6.0),
                PhaseSegment::fixed(Sujood, 10.0),
                PhaseSegment::fixed(Jilsah, 5.0),
                PhaseSegment::fixed(Sujood, 10.0),
                PhaseSegment::fixed(Rising, 2.0),
            ],
            second_of_group: vec![
                PhaseSegment::variable(Recitation),
                PhaseSegment::fixed(Ruku, 12.0),
                PhaseSegment::fixed(Qawmah, 6.0),
                PhaseSegment::fixed(Sujood, 10.0),
                PhaseSegment::fixed(Jilsah, 5.0),
                PhaseSegment::fixed(Sujood, 10.0),
                PhaseSegment::fixed(Tashahhud, 32.0),
            ],
        }
    }
}

impl SegmentProfile {
    pub fn segments(&self, is_first_of_group: bool) -> &[PhaseSegment] {
        if is_first_of_group {
            &self.first_of_group
        } else {
            &self.second_of_group
        }
    }

    pub fn fixed_total(&self, is_first_of_group: bool) -> f64 {
        self.segments(is_first_of_group)
            .iter()
            .filter_map(|segment| segment.seconds)
            .map(|seconds| seconds.max(0.0))
            .sum()
    }

    /// Whether a unit of `unit_duration` seconds leaves room for every fixed
    /// segment of both unit kinds. Below that, phases compress.
    pub fn is_reliable(&self, unit_duration: f64) -> bool {
        unit_duration >= self.fixed_total(true).max(self.fixed_total(false))
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, segments) in [
            ("firstOfGroup", &self.first_of_group),
            ("secondOfGroup", &self.second_of_group),
        ] {
            if segments.is_empty() {
                return Err(format!("{name} must list at least one segment"));
            }
            if segments
                .iter()
                .filter_map(|segment| segment.seconds)
                .any(|seconds| !seconds.is_finite() || seconds < 0.0)
            {
                return Err(format!("{name} has a negative or non-finite duration"));
            }
        }
        Ok(())
    }
}
