use anyhow::{Context, Result};
use git2::{Oid, Repository, ResetType};
use std::path::{Path, PathBuf};

/// The project checkout a rollback rewinds.
pub trait WorkingTree: Send + Sync {
    /// Discard all changes and move HEAD to `commit`.
    fn reset_hard(&self, commit: &str) -> Result<()>;

    /// Current HEAD SHA (None for unborn branches or non-repositories).
    fn head_sha(&self) -> Option<String>;
}

/// A git checkout driven through libgit2.
///
/// The repository is reopened per operation so the handle can be shared
/// across tasks.
#[derive(Debug, Clone)]
pub struct GitWorkingTree {
    project_dir: PathBuf,
}

impl GitWorkingTree {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
        }
    }

    fn open(&self) -> Result<Repository> {
        Repository::open(&self.project_dir).context("Failed to open git repository")
    }
}

impl WorkingTree for GitWorkingTree {
    fn reset_hard(&self, commit: &str) -> Result<()> {
        let repo = self.open()?;
        let oid = Oid::from_str(commit)
            .or_else(|_| repo.revparse_single(commit).map(|obj| obj.id()))
            .with_context(|| format!("Unknown commit '{}'", commit))?;
        let target = repo
            .find_object(oid, None)
            .with_context(|| format!("Commit {} not found", commit))?;
        repo.reset(&target, ResetType::Hard, None)
            .with_context(|| format!("Failed to reset to {}", commit))?;
        tracing::info!(commit, dir = %self.project_dir.display(), "working tree reset");
        Ok(())
    }

    fn head_sha(&self) -> Option<String> {
        let repo = self.open().ok()?;
        let head = repo.head().ok()?.peel_to_commit().ok()?;
        Some(head.id().to_string())
    }
}
