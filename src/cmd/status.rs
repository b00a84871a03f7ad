//! Lock and state overview (`conductor status`).

use anyhow::Result;
use std::path::Path;

/// Phase log entries shown.
const RECENT_PHASES: usize = 5;

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    use conductor::config::Config;
    use conductor::lock::{is_process_alive, read_holder};
    use conductor::state::{BASE_COMMIT, PhaseStatus};
    use conductor::tracker::{GitWorkingTree, WorkingTree};

    let config = Config::new(project_dir.to_path_buf(), false)?;

    println!();
    println!("{}", console::style("Pipeline Status").bold());
    println!("===============");
    println!();

    let lock_line = if !config.lock_file.exists() {
        console::style("free".to_string()).green()
    } else {
        match read_holder(&config.lock_file) {
            Some(pid) if is_process_alive(pid) => {
                console::style(format!("held by PID {}", pid)).yellow()
            }
            Some(pid) => console::style(format!("stale (PID {} is not running)", pid)).red(),
            None => console::style("corrupt lock file".to_string()).red(),
        }
    };
    println!("Lock:    {}", lock_line);

    let head = GitWorkingTree::new(&config.project_dir).head_sha();
    if let Some(sha) = &head {
        println!("HEAD:    {}", short_sha(sha));
    }

    let store = config.state_store();
    if !store.exists() {
        println!("State:   {}", console::style("no pipeline state").dim());
        println!();
        return Ok(());
    }

    let state = store.load();
    println!("Task:    {}", state.task.as_deref().unwrap_or("N/A"));
    println!(
        "Phase:   {}",
        state.current_phase.as_deref().unwrap_or("N/A")
    );
    if let (Some(base), Some(head)) = (state.base_commit(), &head) {
        let position = if head.starts_with(base) || base.starts_with(head.as_str()) {
            console::style("at base commit".to_string()).green()
        } else {
            console::style(format!("base commit {}", short_sha(base))).dim()
        };
        println!("Tree:    {}", position);
    }
    if let Some(updated) = state.meta.last_updated {
        println!("Updated: {}", updated.to_rfc3339());
    }
    if let Some(rolled_back) = state.rolled_back_at {
        println!(
            "Rolled back: {}",
            console::style(rolled_back.to_rfc3339()).yellow()
        );
    }

    if !state.markers.is_empty() {
        println!();
        println!("{}", console::style("Markers").bold());
        for (key, value) in &state.markers {
            let key = if key == BASE_COMMIT {
                console::style(key.as_str()).cyan()
            } else {
                console::style(key.as_str())
            };
            println!("  {:<22} {}", key, value);
        }
    }

    let recent = state.recent_phases(RECENT_PHASES);
    if !recent.is_empty() {
        println!();
        println!("{}", console::style("Recent phases").bold());
        for entry in recent {
            let status = match entry.status {
                PhaseStatus::Completed => console::style(entry.status.to_string()).green(),
                PhaseStatus::Failed => console::style(entry.status.to_string()).red(),
                PhaseStatus::Started => console::style(entry.status.to_string()).yellow(),
            };
            println!(
                "  {} {:<24} {}",
                console::style(entry.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
                entry.phase,
                status
            );
        }
    }
    println!();

    Ok(())
}

fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}
