//! Elapsed media time to semantic position.
//!
//! Everything here is a pure numeric function over clamped inputs: no I/O,
//! no hidden state, no failure modes. Callers hide phase and intermission
//! displays while the duration is unknown instead of expecting errors.

pub mod phase;
pub mod profile;

use chrono::{DateTime, Utc};

use crate::models::{IntermissionWindow, SemanticPosition};

pub use phase::{derive_phase, PhaseLabel};
pub use profile::{PhaseSegment, SegmentProfile};

/// Units per group; intermissions fall only between groups.
pub const UNITS_PER_GROUP: u32 = 2;

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// Places the breaks between prayer groups.
///
/// Content time (`total - breaks * break_secs`) is split evenly across the
/// groups and break `k` sits right after slice `k`. Returns nothing below two
/// groups, or while the duration is too small to hold the breaks.
pub fn compute_intermissions(
    total_duration: f64,
    unit_count: u32,
    break_secs: f64,
) -> Vec<IntermissionWindow> {
    if unit_count < 2 * UNITS_PER_GROUP {
        return Vec::new();
    }

    let groups = unit_count / UNITS_PER_GROUP;
    let breaks = groups.saturating_sub(1);
    let break_secs = sanitize(break_secs);
    if breaks == 0 || break_secs <= 0.0 {
        return Vec::new();
    }

    let content = sanitize(total_duration) - breaks as f64 * break_secs;
    if content <= 0.0 {
        return Vec::new();
    }

    let slice = content / groups as f64;
    (1..=breaks)
        .map(|k| {
            let start = k as f64 * slice + (k - 1) as f64 * break_secs;
            IntermissionWindow {
                start,
                end: start + break_secs,
            }
        })
        .collect()
}

/// Elapsed time with every intermission second removed.
fn content_elapsed(elapsed: f64, windows: &[IntermissionWindow]) -> f64 {
    let skipped: f64 = windows
        .iter()
        .map(|window| {
            if elapsed >= window.end {
                window.duration()
            } else if elapsed > window.start {
                elapsed - window.start
            } else {
                0.0
            }
        })
        .sum();
    (elapsed - skipped).max(0.0)
}

pub fn compute_semantic_position(
    elapsed: f64,
    total_duration: f64,
    unit_count: u32,
    windows: &[IntermissionWindow],
    profile: &SegmentProfile,
) -> SemanticPosition {
    let elapsed = sanitize(elapsed);
    let unit_count = unit_count.max(1);

    let break_total: f64 = windows.iter().map(IntermissionWindow::duration).sum();
    let net_total = (sanitize(total_duration) - break_total).max(1.0);
    let unit_len = net_total / unit_count as f64;
    let net_elapsed = content_elapsed(elapsed, windows);

    let raw_index = (net_elapsed / unit_len).floor() + 1.0;
    let unit_index = raw_index.clamp(1.0, unit_count as f64) as u32;
    let time_within_unit = (net_elapsed - (unit_index - 1) as f64 * unit_len).max(0.0);

    let current_window = windows.iter().find(|window| window.contains(elapsed));
    let intermission_remaining =
        current_window.map(|window| (window.end - elapsed).ceil().max(0.0) as u32);

    let is_first_of_group = unit_index % UNITS_PER_GROUP == 1;
    let phase_label = derive_phase(time_within_unit, unit_len, is_first_of_group, profile);

    SemanticPosition {
        unit_index,
        time_within_unit,
        phase_label,
        is_in_intermission: current_window.is_some(),
        intermission_remaining,
    }
}

/// Share of the broadcast that had already played when a late joiner arrived,
/// as a percentage in `[0, 100]`. `None` until the duration is known.
pub fn late_join_percentage(
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    total_duration: f64,
) -> Option<f64> {
    let total = sanitize(total_duration);
    if total <= 0.0 {
        return None;
    }
    let behind = (now - started_at).num_milliseconds().max(0) as f64 / 1000.0;
    Some((behind / total * 100.0).clamp(0.0, 100.0))
}

/// Where a late joiner should be placed so they follow the event from where it
/// is now: wall time since the start, bounded by what the manifest holds.
pub fn late_join_offset(started_at: DateTime<Utc>, now: DateTime<Utc>, known_duration: f64) -> f64 {
    let behind = (now - started_at).num_milliseconds().max(0) as f64 / 1000.0;
    behind.min(sanitize(known_duration))
}
