use crate::errors::PipelineError;
use crate::state::{PhaseStatus, PipelineState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hard ceiling on agents in one parallel batch.
pub const MAX_PARALLEL_AGENTS: usize = 10;

/// One operation the controller performs on behalf of the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PipelineRequest {
    /// Run one agent and wait for it.
    RunAgent { agent_path: String, input: String },
    /// Run the same agent once per input, concurrently.
    RunAgentsParallel {
        agent_path: String,
        inputs: Vec<String>,
    },
    /// Start an agent and return without waiting.
    RunAgentBackground { agent_path: String, input: String },
    GetState,
    ReportProgress { message: String },
    UpdateProgress {
        phase: String,
        status: PhaseStatus,
        #[serde(default)]
        details: Map<String, Value>,
    },
    /// Reset the working tree to the recorded base commit and clear state.
    Rollback { confirm: String },
}

impl PipelineRequest {
    /// Short operation name for logs.
    pub fn op(&self) -> &'static str {
        match self {
            PipelineRequest::RunAgent { .. } => "run_agent",
            PipelineRequest::RunAgentsParallel { .. } => "run_agents_parallel",
            PipelineRequest::RunAgentBackground { .. } => "run_agent_background",
            PipelineRequest::GetState => "get_state",
            PipelineRequest::ReportProgress { .. } => "report_progress",
            PipelineRequest::UpdateProgress { .. } => "update_progress",
            PipelineRequest::Rollback { .. } => "rollback",
        }
    }

    /// Check required fields and batch limits. Agent paths are checked
    /// against the catalog separately.
    pub fn validate(&self, max_parallel: usize) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidRequest(msg));
        match self {
            PipelineRequest::RunAgent { agent_path, input }
            | PipelineRequest::RunAgentBackground { agent_path, input } => {
                if agent_path.trim().is_empty() || input.trim().is_empty() {
                    return invalid("'agent_path' and 'input' are required".to_string());
                }
            }
            PipelineRequest::RunAgentsParallel { agent_path, inputs } => {
                if agent_path.trim().is_empty() || inputs.is_empty() {
                    return invalid("'agent_path' and 'inputs' are required".to_string());
                }
                let limit = max_parallel.clamp(1, MAX_PARALLEL_AGENTS);
                if inputs.len() > limit {
                    return invalid(format!(
                        "Too many parallel agents ({}). Maximum is {}. Split into multiple batches.",
                        inputs.len(),
                        limit
                    ));
                }
                if inputs.iter().any(|i| i.trim().is_empty()) {
                    return invalid("parallel inputs must not be empty".to_string());
                }
            }
            PipelineRequest::UpdateProgress { phase, .. } => {
                if phase.trim().is_empty() {
                    return invalid("'phase' is required".to_string());
                }
            }
            PipelineRequest::GetState
            | PipelineRequest::ReportProgress { .. }
            | PipelineRequest::Rollback { .. } => {}
        }
        Ok(())
    }
}

/// Outcome of one agent in a parallel batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub input: String,
    pub result: Result<String, String>,
}

/// What the controller answers to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineResponse {
    AgentCompleted {
        agent_path: String,
        output: String,
    },
    /// Outcomes are in the order the inputs were given.
    BatchCompleted {
        agent_path: String,
        outcomes: Vec<BatchOutcome>,
    },
    BackgroundStarted {
        agent_path: String,
        id: usize,
    },
    State(Box<PipelineState>),
    ProgressReported,
    ProgressUpdated {
        phase: String,
        status: PhaseStatus,
    },
    RolledBack {
        base_commit: String,
    },
}

impl PipelineResponse {
    /// `(succeeded, failed)` for a batch response.
    pub fn batch_counts(&self) -> Option<(usize, usize)> {
        match self {
            PipelineResponse::BatchCompleted { outcomes, .. } => {
                let ok = outcomes.iter().filter(|o| o.result.is_ok()).count();
                Some((ok, outcomes.len() - ok))
            }
            _ => None,
        }
    }
}

/// Agent name from an `agents/<name>.md` path, used as the phase name.
pub(crate) fn agent_name(agent_path: &str) -> &str {
    let file = agent_path.rsplit('/').next().unwrap_or(agent_path);
    file.strip_suffix(".md").unwrap_or(file)
}
