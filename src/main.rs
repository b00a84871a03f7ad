use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use conductor::errors::{EXIT_LOCK_BUSY, EXIT_PORT_EXHAUSTED, LockError, PipelineError, PortError};

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Coordinates agent pipelines: project lock, resumable state, retries and ports")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline under the project lock
    Run {
        /// Task description recorded in the pipeline state
        #[arg(required_unless_present = "resume")]
        task: Option<String>,

        /// Resume the run recorded in the pipeline state
        #[arg(long = "continue", conflicts_with = "task")]
        resume: bool,

        /// Plan file (defaults to .conductor/conductor.plan.toml)
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Show the lock holder and pipeline state
    Status,
    /// Hard-reset to the recorded base commit and clear pipeline state
    Rollback {
        /// Must be "yes"
        #[arg(long, default_value = "")]
        confirm: String,
    },
    /// Print the port assigned to a service
    Port {
        service: String,

        /// Base port (defaults to conductor.toml or the built-in table)
        #[arg(long)]
        base: Option<u16>,

        /// Range size (defaults to conductor.toml, 256)
        #[arg(long)]
        range: Option<u16>,

        /// Project path to hash (defaults to the project directory)
        #[arg(long)]
        project: Option<String>,

        /// Print the full assignment as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a stale project lock
    Unlock {
        /// Remove the lock even if its holder is alive
        #[arg(long)]
        force: bool,
    },
    /// Manage conductor.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default conductor.toml file
    Init,
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match cli.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Exit status for a failed command, from the first typed error in the chain.
fn exit_code(err: &anyhow::Error) -> u8 {
    let code = err
        .chain()
        .find_map(|cause| {
            if let Some(e) = cause.downcast_ref::<PipelineError>() {
                Some(e.exit_code())
            } else if let Some(LockError::Busy { .. }) = cause.downcast_ref::<LockError>() {
                Some(EXIT_LOCK_BUSY)
            } else if let Some(PortError::Exhausted { .. }) = cause.downcast_ref::<PortError>() {
                Some(EXIT_PORT_EXHAUSTED)
            } else {
                None
            }
        })
        .unwrap_or(1);
    u8::try_from(code).unwrap_or(1)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run { task, resume, plan } => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;
            runtime.block_on(cmd::cmd_run(
                cli,
                project_dir,
                task.as_deref(),
                *resume,
                plan.as_deref(),
            ))?;
        }
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Rollback { confirm } => cmd::cmd_rollback(cli, &project_dir, confirm)?,
        Commands::Port {
            service,
            base,
            range,
            project,
            json,
        } => cmd::cmd_port(&project_dir, service, *base, *range, project.as_deref(), *json)?,
        Commands::Unlock { force } => cmd::cmd_unlock(&project_dir, *force)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
