//! Project configuration file for conductor.
//!
//! Settings live in `.conductor/conductor.toml` inside the project. Every
//! section and field is optional; layering is file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! agent_cmd = "claude"
//! agents_dir = "agents"
//! model = "sonnet"
//! allowed_tools = ["Read", "Write", "Edit", "Bash", "Glob", "Grep"]
//!
//! [retry]
//! max_attempts = 3
//! base_delay_secs = 2.0
//! max_delay_secs = 30.0
//!
//! [ports]
//! range_size = 256
//!
//! [ports.base]
//! postgres = 5400
//! minio = 9400
//!
//! [parallel]
//! max_agents = 10
//! ```

use crate::agent::DEFAULT_ALLOWED_TOOLS;
use crate::pipeline::MAX_PARALLEL_AGENTS;
use crate::ports::{DEFAULT_RANGE_SIZE, default_base_port};
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Config file name inside `.conductor/`.
pub const CONFIG_FILE_NAME: &str = "conductor.toml";

/// Environment variable overriding the agent command.
pub const AGENT_CMD_ENV: &str = "CONDUCTOR_AGENT_CMD";

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Agent CLI command (default: "claude")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_cmd: Option<String>,
    /// Directory holding `<name>.md` agent files, relative to the project
    #[serde(default = "default_agents_dir")]
    pub agents_dir: String,
    /// Model passed to the agent CLI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tools agents may use
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
}

fn default_agents_dir() -> String {
    "agents".to_string()
}

fn default_allowed_tools() -> Vec<String> {
    DEFAULT_ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            agent_cmd: None,
            agents_dir: default_agents_dir(),
            model: None,
            allowed_tools: default_allowed_tools(),
        }
    }
}

/// Port allocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsSection {
    /// Slots per service range
    #[serde(default = "default_range_size")]
    pub range_size: u16,
    /// Base port per service, overriding the built-in table
    #[serde(default)]
    pub base: BTreeMap<String, u16>,
}

fn default_range_size() -> u16 {
    DEFAULT_RANGE_SIZE
}

impl Default for PortsSection {
    fn default() -> Self {
        Self {
            range_size: default_range_size(),
            base: BTreeMap::new(),
        }
    }
}

/// Parallel execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelSection {
    /// Agents per parallel batch (never more than 10)
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
}

fn default_max_agents() -> usize {
    MAX_PARALLEL_AGENTS
}

impl Default for ParallelSection {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
        }
    }
}

/// The complete conductor.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub ports: PortsSection,
    #[serde(default)]
    pub parallel: ParallelSection,
}

impl ConductorToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `conductor.toml` from `conductor_dir`, or defaults if absent.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let config_path = conductor_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating its directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Agent command: file → environment → "claude".
    pub fn agent_cmd(&self) -> String {
        self.agent_cmd_with_env(std::env::var(AGENT_CMD_ENV).ok())
    }

    fn agent_cmd_with_env(&self, env: Option<String>) -> String {
        self.project
            .agent_cmd
            .clone()
            .or(env)
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Base port for `service`: configured, then built-in.
    pub fn base_port(&self, service: &str) -> Option<u16> {
        self.ports
            .base
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(service))
            .map(|(_, port)| *port)
            .or_else(|| default_base_port(service))
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.parallel.max_agents == 0 || self.parallel.max_agents > MAX_PARALLEL_AGENTS {
            warnings.push(format!(
                "parallel.max_agents = {} is outside 1..={}; it will be clamped",
                self.parallel.max_agents, MAX_PARALLEL_AGENTS
            ));
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts = 0 behaves like 1".to_string());
        }
        if !self.retry.base_delay_secs.is_finite() || !self.retry.max_delay_secs.is_finite() {
            warnings.push(format!(
                "retry delays must be finite (base_delay_secs = {}, max_delay_secs = {})",
                self.retry.base_delay_secs, self.retry.max_delay_secs
            ));
        }
        if self.retry.base_delay_secs < 0.0 || self.retry.max_delay_secs < 0.0 {
            warnings.push("retry delays must not be negative".to_string());
        }
        if self.retry.max_delay_secs < self.retry.base_delay_secs {
            warnings.push(format!(
                "retry.max_delay_secs ({}) is below base_delay_secs ({})",
                self.retry.max_delay_secs, self.retry.base_delay_secs
            ));
        }
        if self.ports.range_size == 0 {
            warnings.push("ports.range_size must be non-zero".to_string());
        }
        if self.project.allowed_tools.is_empty() {
            warnings.push("project.allowed_tools is empty; agents will have no tools".to_string());
        }

        warnings
    }
}
