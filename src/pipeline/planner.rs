use super::request::{PipelineRequest, PipelineResponse};
use crate::errors::PipelineError;
use crate::state::PipelineState;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;

/// Default plan file name in the project's `.conductor` directory.
pub const PLAN_FILE_NAME: &str = "conductor.plan.toml";

/// Decides what the pipeline does next.
///
/// The controller calls `next` with the current state and the answer to the
/// previous request until it returns `None`. Phase ordering is entirely the
/// planner's business.
#[async_trait]
pub trait PhasePlanner: Send {
    async fn next(
        &mut self,
        state: &PipelineState,
        last: Option<&PipelineResponse>,
    ) -> Result<Option<PipelineRequest>, PipelineError>;
}

#[derive(Debug, Deserialize)]
struct PlanFile {
    #[serde(default, rename = "step")]
    steps: Vec<PipelineRequest>,
}

/// Replays a fixed list of requests in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPlanner {
    steps: VecDeque<PipelineRequest>,
}

impl ScriptedPlanner {
    pub fn from_requests(steps: impl IntoIterator<Item = PipelineRequest>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Parse a plan from TOML content (`[[step]]` tables).
    pub fn parse(content: &str) -> Result<Self> {
        let plan: PlanFile = toml::from_str(content).context("Failed to parse plan")?;
        Ok(Self::from_requests(plan.steps))
    }

    /// Load a plan file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid plan file {}", path.display()))
    }

    /// Steps not yet handed out.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

#[async_trait]
impl PhasePlanner for ScriptedPlanner {
    async fn next(
        &mut self,
        _state: &PipelineState,
        _last: Option<&PipelineResponse>,
    ) -> Result<Option<PipelineRequest>, PipelineError> {
        Ok(self.steps.pop_front())
    }
}
