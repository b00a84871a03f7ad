//! Working tree and state rollback (`conductor rollback`).

use anyhow::Result;
use std::path::Path;

use super::super::Cli;

pub fn cmd_rollback(cli: &Cli, project_dir: &Path, confirm: &str) -> Result<()> {
    use conductor::config::Config;

    let config = Config::new(project_dir.to_path_buf(), cli.verbose)?;
    let controller = config.controller()?;
    let commit = controller.rollback(confirm)?;

    println!(
        "{} working tree reset to {}",
        console::style("Rolled back:").yellow().bold(),
        console::style(&commit).cyan()
    );
    println!("Pipeline state cleared; only the base commit is kept.");
    Ok(())
}
