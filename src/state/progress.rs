//! Plain-text progress summary for operators tailing a run.

use super::types::PipelineState;
use std::fmt::Write;

/// Phase history entries shown in the summary.
const HISTORY_LEN: usize = 10;

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

/// Render the progress summary for `state`.
pub fn render_progress(state: &PipelineState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Pipeline Progress");
    let _ = writeln!(out);
    let _ = writeln!(out, "Task: {}", or_na(state.task.as_deref()));
    let _ = writeln!(out, "Started: {}", or_na(state.started_at.map(|t| t.to_rfc3339())));
    let _ = writeln!(out, "Last Update: {}", or_na(state.last_updated.map(|t| t.to_rfc3339())));
    let _ = writeln!(out, "Current Phase: {}", or_na(state.current_phase.as_deref()));
    let _ = writeln!(out, "Branch: {}", or_na(state.marker("branch")));

    if let Some(at) = state.rolled_back_at {
        let _ = writeln!(out, "Rolled Back: {}", at.to_rfc3339());
    }

    let others: Vec<_> = state.markers.iter().filter(|(k, _)| *k != "branch").collect();
    if !others.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Artifacts");
        for (key, value) in others {
            let _ = writeln!(out, "- {}: {}", key, value);
        }
    }

    let recent = state.recent_phases(HISTORY_LEN);
    if !recent.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Phase History");
        for entry in recent {
            let _ = writeln!(
                out,
                "- [{}] {}: {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.phase,
                entry.status
            );
        }
    }
    out
}
