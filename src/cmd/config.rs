//! Configuration view and validation commands (`conductor config`).

use anyhow::{Context, Result};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use conductor::conductor_config::{AGENT_CMD_ENV, ConductorToml};
    use conductor::config::Config;

    let config = Config::new(project_dir.to_path_buf(), false)?;
    let config_path = &config.config_file;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Conductor Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No conductor.toml found at {}", config_path.display());
                println!("Using default configuration:");
            }
            let file_config = &config.toml;
            println!();

            let rendered =
                toml::to_string_pretty(file_config).context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            println!("Effective values (with env overrides):");
            println!("  agent_cmd = \"{}\"", config.agent_cmd);
            if std::env::var(AGENT_CMD_ENV).is_ok() && file_config.project.agent_cmd.is_none() {
                println!(
                    "  {}",
                    console::style(format!("(from {})", AGENT_CMD_ENV)).dim()
                );
            }
            println!();

            if !config_path.exists() {
                println!("Run 'conductor config init' to create a conductor.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No conductor.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", console::style(warning).yellow());
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("conductor.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            ConductorToml::default().save(config_path)?;

            println!("Created conductor.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [project] agent_cmd, agents_dir, model, allowed_tools");
            println!("  - [retry] max_attempts, base_delay_secs, max_delay_secs");
            println!("  - [ports.base] per-service base ports");
            println!();
        }
    }

    Ok(())
}
