//! Typed error hierarchy for the conductor library.
//!
//! One enum per subsystem:
//! - `LockError`: project lock acquisition
//! - `StateError`: pipeline state persistence and rollback
//! - `RetryError`: terminal outcomes of the retry executor
//! - `PortError`: service port allocation
//! - `AgentError`: agent invocation failures
//! - `PipelineError`: everything the controller can surface, with exit codes

use std::path::PathBuf;
use thiserror::Error;

/// Exit status for a project whose lock is held by a live process.
pub const EXIT_LOCK_BUSY: i32 = 2;
/// Exit status when no port could be allocated.
pub const EXIT_PORT_EXHAUSTED: i32 = 3;
/// Exit status after an operator interrupt (128 + SIGINT).
pub const EXIT_INTERRUPTED: i32 = 130;

/// Errors from the project lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another pipeline (PID {pid}) is running in this directory (lock: {path})")]
    Busy { pid: u32, path: PathBuf },

    #[error("lock file I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the state store.
///
/// An unparsable state document is not an error: `load` recovers it by
/// starting fresh and logging the loss.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to write state file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize pipeline state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("rollback requires confirm='yes' (this discards all pipeline changes)")]
    RollbackNotConfirmed,

    #[error("no baseCommit recorded in pipeline state; cannot roll back")]
    RollbackPrecondition,
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("non-retryable failure (matched \"{keyword}\"): {source}")]
    NonRetryable {
        keyword: &'static str,
        #[source]
        source: E,
    },

    #[error("all {attempts} attempts failed, last error: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NonRetryable { .. } => 1,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Errors from port allocation.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("unable to find an available port for {service}")]
    Exhausted { service: String },

    #[error("port range size must be non-zero")]
    InvalidRange,
}

/// Errors from an agent invocation. The message text feeds retry
/// classification, so variants keep the agent's own wording.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent exited with non-zero code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("agent reported an error: {0}")]
    Reported(String),

    #[error("agent I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the pipeline controller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("agent {agent} failed: {source}")]
    Agent {
        agent: String,
        #[source]
        source: RetryError<AgentError>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no resumable pipeline state at {0}")]
    NoResumableState(PathBuf),

    #[error("pipeline interrupted")]
    Interrupted,

    #[error("working tree reset failed: {0}")]
    WorkingTree(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Lock(LockError::Busy { .. }) => EXIT_LOCK_BUSY,
            PipelineError::Port(PortError::Exhausted { .. }) => EXIT_PORT_EXHAUSTED,
            PipelineError::Interrupted => EXIT_INTERRUPTED,
            _ => 1,
        }
    }
}
