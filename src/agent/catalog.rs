//! Discovery and validation of agent definition files.

use crate::errors::PipelineError;
use anyhow::Context;
use glob::glob;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Agents that exist on disk but may not be invoked as pipeline steps.
pub const EXCLUDED_AGENTS: &[&str] = &["pipeline-orchestrator"];

const PATH_PREFIX: &str = "agents/";
const PATH_SUFFIX: &str = ".md";

/// The set of invocable agents in one directory.
///
/// Requests name agents as `agents/<name>.md`; the catalog resolves that to
/// `<agents_dir>/<name>.md`. Agent files are opaque: their content becomes
/// the system prompt as-is.
#[derive(Debug, Clone)]
pub struct AgentCatalog {
    agents_dir: PathBuf,
    names: BTreeSet<String>,
}

impl AgentCatalog {
    /// Scan `agents_dir` for `*.md` agent files.
    ///
    /// A missing directory yields an empty catalog.
    pub fn discover(agents_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let agents_dir = agents_dir.into();
        let pattern = agents_dir.join("*.md").to_string_lossy().to_string();

        let names: BTreeSet<String> = glob(&pattern)
            .context("Failed to read glob pattern")?
            .filter_map(|entry| entry.ok())
            .filter_map(|path| {
                let file_name = path.file_name()?.to_string_lossy().into_owned();
                // Windows alternate data stream copies
                if file_name.contains(":Zone.Identifier") {
                    return None;
                }
                let stem = path.file_stem()?.to_string_lossy().into_owned();
                (!EXCLUDED_AGENTS.contains(&stem.as_str())).then_some(stem)
            })
            .collect();

        tracing::info!(
            count = names.len(),
            dir = %agents_dir.display(),
            "discovered agents: {}",
            names.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(Self { agents_dir, names })
    }

    pub fn agents_dir(&self) -> &Path {
        &self.agents_dir
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Resolve `agents/<name>.md` to its file, checking format, membership
    /// and existence.
    pub fn validate(&self, agent_path: &str) -> Result<PathBuf, PipelineError> {
        let name = agent_path
            .strip_prefix(PATH_PREFIX)
            .and_then(|rest| rest.strip_suffix(PATH_SUFFIX))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .ok_or_else(|| {
                PipelineError::InvalidRequest(format!(
                    "Agent path must be 'agents/<name>.md', got: {}",
                    agent_path
                ))
            })?;

        if !self.contains(name) {
            let available = self.names().collect::<Vec<_>>().join(", ");
            return Err(PipelineError::InvalidRequest(format!(
                "Unknown agent '{}'. Available agents: {}",
                name, available
            )));
        }

        let file = self.agents_dir.join(format!("{}{}", name, PATH_SUFFIX));
        if !file.exists() {
            return Err(PipelineError::InvalidRequest(format!(
                "Agent file not found: {}",
                file.display()
            )));
        }
        Ok(file)
    }

    /// Validate `agent_path` and return the agent definition text.
    pub fn system_prompt(&self, agent_path: &str) -> Result<String, PipelineError> {
        let file = self.validate(agent_path)?;
        let content = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read agent file {}", file.display()))?;
        Ok(content)
    }
}
