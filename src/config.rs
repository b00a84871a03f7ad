use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::{AgentCatalog, ClaudeCliAgent};
use crate::conductor_config::{CONFIG_FILE_NAME, ConductorToml};
use crate::lock::lock_path;
use crate::pipeline::{PLAN_FILE_NAME, PipelineController};
use crate::retry::RetryExecutor;
use crate::state::{PROGRESS_FILE, STATE_FILE, StateStore};

/// Runtime configuration for conductor.
///
/// Resolves the project directory once and derives every path the commands
/// touch from it, alongside the parsed `conductor.toml`.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub config_file: PathBuf,
    pub lock_file: PathBuf,
    pub state_file: PathBuf,
    pub progress_file: PathBuf,
    pub plan_file: PathBuf,
    pub agents_dir: PathBuf,
    pub agent_cmd: String,
    pub verbose: bool,
    pub toml: ConductorToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let conductor_dir = project_dir.join(".conductor");
        let toml = ConductorToml::load_or_default(&conductor_dir)?;

        for warning in toml.validate() {
            tracing::warn!("conductor.toml: {}", warning);
        }

        Ok(Self {
            config_file: conductor_dir.join(CONFIG_FILE_NAME),
            plan_file: conductor_dir.join(PLAN_FILE_NAME),
            lock_file: lock_path(&project_dir),
            state_file: project_dir.join(STATE_FILE),
            progress_file: project_dir.join(PROGRESS_FILE),
            agents_dir: project_dir.join(&toml.project.agents_dir),
            agent_cmd: toml.agent_cmd(),
            project_dir,
            verbose,
            toml,
        })
    }

    /// Project path as used for port hashing.
    pub fn project_key(&self) -> String {
        self.project_dir.to_string_lossy().into_owned()
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::at(self.state_file.clone(), self.progress_file.clone())
    }

    /// Controller wired to the agent CLI and the configured policies.
    pub fn controller(&self) -> Result<PipelineController> {
        let catalog = AgentCatalog::discover(self.agents_dir.clone())?;
        tracing::debug!(
            agents_dir = %self.agents_dir.display(),
            agents = catalog.names().count(),
            "discovered agents"
        );
        let invoker = ClaudeCliAgent::new(self.agent_cmd.as_str())
            .with_model(self.toml.project.model.clone());

        Ok(
            PipelineController::new(&self.project_dir, catalog, Arc::new(invoker))
                .with_store(self.state_store())
                .with_lock_file(self.lock_file.clone())
                .with_retry(RetryExecutor::new(self.toml.retry))
                .with_allowed_tools(self.toml.project.allowed_tools.clone())
                .with_max_parallel(self.toml.parallel.max_agents),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_derive_from_project_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        let root = dir.path().canonicalize().unwrap();

        assert_eq!(config.project_dir, root);
        assert_eq!(config.lock_file, root.join(".pipeline.lock"));
        assert_eq!(config.state_file, root.join("specs/.pipeline-state.json"));
        assert_eq!(config.progress_file, root.join("progress.txt"));
        assert_eq!(config.config_file, root.join(".conductor/conductor.toml"));
        assert_eq!(config.plan_file, root.join(".conductor/conductor.plan.toml"));
        assert_eq!(config.agents_dir, root.join("agents"));
    }

    #[test]
    fn test_config_file_is_applied() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".conductor")).unwrap();
        std::fs::write(
            dir.path().join(".conductor/conductor.toml"),
            "[project]\nagent_cmd = \"my-agent\"\nagents_dir = \"prompts/agents\"\n",
        )
        .unwrap();

        let config = Config::new(dir.path().to_path_buf(), true).unwrap();
        assert_eq!(config.agent_cmd, "my-agent");
        assert!(config.agents_dir.ends_with("prompts/agents"));
        assert!(config.verbose);
    }

    #[test]
    fn test_controller_uses_configured_paths() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("agents")).unwrap();
        std::fs::write(dir.path().join("agents/git-setup.md"), "You set up git.").unwrap();

        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        let controller = config.controller().unwrap();
        assert_eq!(controller.lock_file(), config.lock_file.as_path());
        assert_eq!(controller.store().state_file(), config.state_file.as_path());
    }

    #[test]
    fn test_missing_project_dir_fails() {
        let dir = tempdir().unwrap();
        let err = Config::new(dir.path().join("nope"), false).unwrap_err();
        assert!(err.to_string().contains("Failed to resolve project directory"));
    }
}
