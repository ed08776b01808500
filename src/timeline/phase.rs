use serde::{Deserialize, Serialize};

use super::profile::SegmentProfile;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum PhaseLabel {
    OpeningTakbeer,
    Recitation,
    Ruku,
    Qawmah,
    Sujood,
    Jilsah,
    Rising,
    Tashahhud,
}

impl PhaseLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseLabel::OpeningTakbeer => "Takbeer",
            PhaseLabel::Recitation => "Recitation",
            PhaseLabel::Ruku => "Ruku",
            PhaseLabel::Qawmah => "Qawmah",
            PhaseLabel::Sujood => "Sujood",
            PhaseLabel::Jilsah => "Jilsah",
            PhaseLabel::Rising => "Rising",
            PhaseLabel::Tashahhud => "Tashahhud",
        }
    }
}

impl std::fmt::Display for PhaseLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a point inside a unit to the liturgical step being performed.
///
/// The variable recitation step gets `unit_duration - fixed_total`, clamped at
/// zero; when the unit estimate is shorter than the fixed budget the later
/// steps compress instead of failing. Times past the last segment report the
/// last segment's label.
pub fn derive_phase(
    time_within_unit: f64,
    unit_duration: f64,
    is_first_of_group: bool,
    profile: &SegmentProfile,
) -> PhaseLabel {
    let segments = profile.segments(is_first_of_group);
    let Some(last) = segments.last() else {
        return PhaseLabel::Recitation;
    };

    let unit_duration = if unit_duration.is_finite() {
        unit_duration.max(0.0)
    } else {
        0.0
    };
    let variable_count = segments.iter().filter(|s| s.seconds.is_none()).count().max(1);
    let variable_len =
        (unit_duration - profile.fixed_total(is_first_of_group)).max(0.0) / variable_count as f64;

    let mut remaining = if time_within_unit.is_finite() {
        time_within_unit.max(0.0)
    } else {
        0.0
    };

    for segment in segments {
        let len = segment.seconds.map_or(variable_len, |s| s.max(0.0));
        if remaining < len {
            return segment.label;
        }
        remaining -= len;
    }

    last.label
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> SegmentProfile {
        SegmentProfile::default()
    }

    #[test]
    fn first_unit_walks_through_segments() {
        let p = profile();
        // 300s unit: recitation = 300 - 47 = 253s, spanning [2, 255).
        assert_eq!(derive_phase(0.0, 300.0, true, &p), PhaseLabel::OpeningTakbeer);
        assert_eq!(derive_phase(1.99, 300.0, true, &p), PhaseLabel::OpeningTakbeer);
        assert_eq!(derive_phase(2.0, 300.0, true, &p), PhaseLabel::Recitation);
        assert_eq!(derive_phase(254.0, 300.0, true, &p), PhaseLabel::Recitation);
        assert_eq!(derive_phase(255.0, 300.0, true, &p), PhaseLabel::Ruku);
        assert_eq!(derive_phase(267.0, 300.0, true, &p), PhaseLabel::Qawmah);
        assert_eq!(derive_phase(273.0, 300.0, true, &p), PhaseLabel::Sujood);
        assert_eq!(derive_phase(283.0, 300.0, true, &p), PhaseLabel::Jilsah);
        assert_eq!(derive_phase(288.0, 300.0, true, &p), PhaseLabel::Sujood);
        assert_eq!(derive_phase(298.5, 300.0, true, &p), PhaseLabel::Rising);
    }

    #[test]
    fn second_unit_ends_in_tashahhud() {
        let p = profile();
        assert_eq!(derive_phase(0.0, 300.0, false, &p), PhaseLabel::Recitation);
        assert_eq!(derive_phase(290.0, 300.0, false, &p), PhaseLabel::Tashahhud);
        assert_eq!(derive_phase(300.0, 300.0, false, &p), PhaseLabel::Tashahhud);
    }

    #[test]
    fn short_estimate_compresses_without_failing() {
        let p = profile();
        // 20s is below the fixed budget: recitation collapses to nothing.
        assert_eq!(derive_phase(0.0, 20.0, false, &p), PhaseLabel::Ruku);
        assert_eq!(derive_phase(2.5, 20.0, true, &p), PhaseLabel::Ruku);
        assert_eq!(derive_phase(500.0, 20.0, true, &p), PhaseLabel::Rising);
    }

    #[test]
    fn every_point_of_a_unit_has_a_label() {
        let p = profile();
        for unit_duration in [0.0, 10.0, 47.0, 75.0, 120.0, 288.75, 900.0] {
            for is_first in [true, false] {
                let mut t = 0.0;
                while t <= unit_duration {
                    let label = derive_phase(t, unit_duration, is_first, &p);
                    assert!(!label.as_str().is_empty());
                    t += 0.25;
                }
            }
        }
    }

    #[test]
    fn garbage_inputs_do_not_panic() {
        let p = profile();
        assert_eq!(derive_phase(f64::NAN, 300.0, true, &p), PhaseLabel::OpeningTakbeer);
        assert_eq!(derive_phase(-5.0, f64::INFINITY, false, &p), PhaseLabel::Ruku);

        let empty = SegmentProfile {
            first_of_group: vec![],
            second_of_group: vec![],
        };
        assert_eq!(derive_phase(10.0, 300.0, true, &empty), PhaseLabel::Recitation);
    }
}
