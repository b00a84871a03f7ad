//! The pipeline controller.
//!
//! A run holds the project lock from start to finish, loads or creates the
//! state document, then asks a [`PhasePlanner`] for requests one at a time:
//!
//! | Request | Effect |
//! |---------|--------|
//! | `RunAgent` | invoke one agent with retries, record started/completed/failed |
//! | `RunAgentsParallel` | up to 10 invocations at once, failures counted |
//! | `RunAgentBackground` | start an agent, joined before the run ends |
//! | `GetState` | snapshot of the state document |
//! | `ReportProgress` | log a message for the operator |
//! | `UpdateProgress` | append to the phase log |
//! | `Rollback` | hard-reset the working tree and clear state |
//!
//! Markers found in any agent output are merged into the state and persisted
//! straight away.

mod controller;
mod planner;
mod request;

pub use controller::{PipelineController, RunSummary};
pub use planner::{PLAN_FILE_NAME, PhasePlanner, ScriptedPlanner};
pub use request::{BatchOutcome, MAX_PARALLEL_AGENTS, PipelineRequest, PipelineResponse};
