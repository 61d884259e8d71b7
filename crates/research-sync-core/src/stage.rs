//! Display helpers for stage names, percentages and elapsed time
//!
//! Used by display adapters only. The controller never infers completion
//! from anything in here.

use crate::snapshot::{clamp_percentage, Snapshot};

const STAGE_LABELS: &[(&str, &str)] = &[
    ("planning", "Research Planning"),
    ("data_collection", "Data Collection"),
    ("analysis", "Analysis"),
    ("synthesis", "Synthesis"),
    ("report_generation", "Report Generation"),
    ("complete", "Complete"),
];

/// Human label for a stage key; unknown keys are returned unchanged
pub fn stage_label(step: &str) -> &str {
    STAGE_LABELS
        .iter()
        .find(|(key, _)| *key == step)
        .map(|(_, label)| *label)
        .unwrap_or(step)
}

/// Percentage to show for a snapshot
///
/// Falls back to the stage position when the server reports no percentage.
pub fn display_percentage(snapshot: &Snapshot) -> f64 {
    if snapshot.percentage > 0.0 {
        return snapshot.percentage;
    }
    if snapshot.total_steps == 0 {
        return 0.0;
    }
    clamp_percentage(f64::from(snapshot.step_number) / f64::from(snapshot.total_steps) * 100.0)
}

/// `"{minutes}m {seconds}s"`
pub fn format_elapsed(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{}m {}s", seconds / 60, seconds % 60)
}
