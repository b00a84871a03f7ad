//! Resumable pipeline state.
//!
//! The state document records the task, an append-only phase log and the
//! artifact markers agents report in their output. It is written after every
//! mutation so an interrupted run can resume where it stopped:
//!
//! - `types` - the document itself
//! - `markers` - `TOKEN: value` extraction from agent output
//! - `store` - atomic persistence, recovery and rollback
//! - `progress` - the plain-text summary written next to it

mod markers;
mod progress;
mod store;
mod types;

pub use markers::{MARKER_TABLE, extract_markers, scan_markers};
pub use progress::render_progress;
pub use store::{PROGRESS_FILE, STATE_FILE, StateStore, load, persist, rollback, rollback_target};
pub use types::{BASE_COMMIT, PhaseEntry, PhaseStatus, PipelineState, StateMeta};
