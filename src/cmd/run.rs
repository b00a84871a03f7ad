//! Pipeline execution (`conductor run`).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::super::Cli;

pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    task: Option<&str>,
    resume: bool,
    plan: Option<&Path>,
) -> Result<()> {
    use conductor::config::Config;
    use conductor::pipeline::ScriptedPlanner;

    let config = Config::new(project_dir, cli.verbose)?;
    let plan_file = plan
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.plan_file.clone());
    if !plan_file.exists() {
        anyhow::bail!(
            "No plan found at {}. Create it or pass --plan <FILE>.",
            plan_file.display()
        );
    }
    let mut planner = ScriptedPlanner::load(&plan_file)?;
    let controller = config.controller()?;

    if config.verbose {
        println!("Agent command: {}", config.agent_cmd);
        println!("Agents dir:    {}", config.agents_dir.display());
        println!("Lock file:     {}", config.lock_file.display());
    }

    println!(
        "{} {} step(s) from {}",
        console::style("Plan:").bold(),
        planner.remaining(),
        plan_file.display()
    );

    let summary = if resume {
        controller.resume(&mut planner).await?
    } else {
        let task = task.context("A task is required unless --continue is given")?;
        println!("{} {}", console::style("Task:").bold(), task);
        controller.run(task, &mut planner).await?
    };

    println!();
    println!(
        "{} {} phase update(s) recorded",
        console::style("Pipeline finished:").green().bold(),
        summary.phases_recorded
    );
    if summary.background_joined > 0 {
        let failed = if summary.background_failed > 0 {
            console::style(format!("{} failed", summary.background_failed))
                .red()
                .to_string()
        } else {
            console::style("none failed").dim().to_string()
        };
        println!(
            "  background agents: {} joined, {}",
            summary.background_joined, failed
        );
    }
    println!(
        "  state:    {}",
        console::style(config.state_file.display()).dim()
    );
    println!(
        "  progress: {}",
        console::style(config.progress_file.display()).dim()
    );

    Ok(())
}
