//! Stale lock removal (`conductor unlock`).

use anyhow::Result;
use std::path::Path;

pub fn cmd_unlock(project_dir: &Path, force: bool) -> Result<()> {
    use conductor::config::Config;
    use conductor::lock::{is_process_alive, read_holder, release};

    let config = Config::new(project_dir.to_path_buf(), false)?;
    let lock_file = &config.lock_file;

    if !lock_file.exists() {
        println!("No lock file at {}", lock_file.display());
        return Ok(());
    }

    match read_holder(lock_file) {
        Some(pid) if is_process_alive(pid) && !force => {
            anyhow::bail!(
                "Lock is held by running process {}. Stop it first or pass --force.",
                pid
            );
        }
        Some(pid) if is_process_alive(pid) => {
            tracing::warn!(pid, "forcibly removing lock held by a live process");
            release(lock_file)?;
            println!(
                "{} lock held by PID {}",
                console::style("Force-removed").red().bold(),
                pid
            );
        }
        Some(pid) => {
            release(lock_file)?;
            println!(
                "{} stale lock (PID {} is not running)",
                console::style("Removed").green(),
                pid
            );
        }
        None => {
            release(lock_file)?;
            println!("{} corrupt lock file", console::style("Removed").green());
        }
    }
    Ok(())
}
