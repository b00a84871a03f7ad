//! Agent invocation.
//!
//! The pipeline never looks inside an agent: it hands over a system prompt,
//! a tool allowlist, a working directory and a task, and gets text back.
//! Invocations are slow and fallible; the controller wraps them in the retry
//! executor.

mod catalog;
mod claude;
mod stream;

pub use catalog::{AgentCatalog, EXCLUDED_AGENTS};
pub use claude::ClaudeCliAgent;
pub use stream::{ContentBlock, StreamEvent, describe_tool_use};

use crate::errors::AgentError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Tools granted to agents unless configured otherwise.
pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &["Read", "Write", "Edit", "Bash", "Glob", "Grep"];

/// One agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    /// Opaque agent definition, passed through untouched.
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub working_dir: PathBuf,
    pub task: String,
}

/// A tool call the agent made while working.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUse {
    pub name: String,
    pub input: serde_json::Value,
}

/// What an agent produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentResponse {
    pub text: String,
    pub tool_uses: Vec<ToolUse>,
}

impl AgentResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_uses: Vec::new(),
        }
    }
}

/// Runs an agent to completion.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}

/// Build the task text an agent receives: where to write, then the input.
pub fn compose_task(working_dir: &Path, input: &str) -> String {
    format!(
        "## Project Directory\nWrite all output files to: {}\n\n## Task Input\n{}",
        working_dir.display(),
        input
    )
}
