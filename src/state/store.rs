//! Crash-safe persistence of the pipeline state document.
//!
//! Every write replaces the whole document: it is serialized to a sibling
//! temp file, synced, then renamed over the target. A crash leaves either the
//! previous document or the new one, never a mix.

use super::progress::render_progress;
use super::types::{BASE_COMMIT, PipelineState};
use crate::errors::StateError;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// State document location relative to the project directory.
pub const STATE_FILE: &str = "specs/.pipeline-state.json";

/// Human-readable progress summary relative to the project directory.
pub const PROGRESS_FILE: &str = "progress.txt";

/// Read the state document at `path`.
///
/// A missing document yields a fresh one. So does an unparsable one: the
/// loss is logged and the run starts over rather than failing.
pub fn load(path: &Path) -> PipelineState {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return PipelineState::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read state file, starting fresh");
            return PipelineState::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt state file, starting fresh");
            PipelineState::default()
        }
    }
}

/// Stamp `meta` and atomically write `state` to `path`.
pub fn persist(state: &mut PipelineState, path: &Path) -> Result<(), StateError> {
    state.meta.last_updated = Some(next_stamp(state.meta.last_updated));
    state.meta.owner_pid = Some(std::process::id());

    let json = serde_json::to_string_pretty(state)?;
    write_atomic(path, json.as_bytes()).map_err(|source| StateError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// A timestamp strictly later than `previous`, even if the clock has not
/// advanced or went backwards.
fn next_stamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

/// Check the rollback preconditions and return the commit to reset to.
pub fn rollback_target<'a>(state: &'a PipelineState, confirm: &str) -> Result<&'a str, StateError> {
    if confirm != "yes" {
        return Err(StateError::RollbackNotConfirmed);
    }
    state.base_commit().ok_or(StateError::RollbackPrecondition)
}

/// Replace `state` with a minimal post-rollback document and persist it.
///
/// Only `baseCommit` and the task survive. On any error `state` is left as
/// it was.
pub fn rollback(state: &mut PipelineState, confirm: &str, path: &Path) -> Result<(), StateError> {
    let base_commit = rollback_target(state, confirm)?.to_string();

    let mut next = PipelineState {
        task: state.task.clone(),
        rolled_back_at: Some(Utc::now()),
        meta: state.meta.clone(),
        markers: BTreeMap::from([(BASE_COMMIT.to_string(), base_commit)]),
        ..Default::default()
    };
    persist(&mut next, path)?;
    tracing::info!(path = %path.display(), "pipeline state rolled back");
    *state = next;
    Ok(())
}

/// Write `bytes` to `path` via a synced sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// The state and progress files of one project.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_file: PathBuf,
    progress_file: PathBuf,
}

impl StateStore {
    /// Standard locations under `project_dir`.
    pub fn new(project_dir: &Path) -> Self {
        Self {
            state_file: project_dir.join(STATE_FILE),
            progress_file: project_dir.join(PROGRESS_FILE),
        }
    }

    /// Explicit locations.
    pub fn at(state_file: PathBuf, progress_file: PathBuf) -> Self {
        Self {
            state_file,
            progress_file,
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn progress_file(&self) -> &Path {
        &self.progress_file
    }

    /// Whether a state document exists on disk.
    pub fn exists(&self) -> bool {
        self.state_file.exists()
    }

    pub fn load(&self) -> PipelineState {
        load(&self.state_file)
    }

    pub fn persist(&self, state: &mut PipelineState) -> Result<(), StateError> {
        persist(state, &self.state_file)
    }

    pub fn rollback(&self, state: &mut PipelineState, confirm: &str) -> Result<(), StateError> {
        rollback(state, confirm, &self.state_file)
    }

    /// Render `state` to the progress file.
    pub fn write_progress(&self, state: &PipelineState) -> Result<(), StateError> {
        write_atomic(&self.progress_file, render_progress(state).as_bytes()).map_err(|source| {
            StateError::Write {
                path: self.progress_file.clone(),
                source,
            }
        })
    }
}
