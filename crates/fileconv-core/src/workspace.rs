//! Task workspace management
//!
//! A [`Workspace`] owns two directories under an injectable root:
//!
//! - `uploads/`: flat staging area for raw uploads
//! - `outputs/<task_id>/`: one isolated artifact directory per task
//!
//! Isolation comes from fresh v4 identifiers, never from locking.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ConvertError;

pub const UPLOADS_DIR: &str = "uploads";
pub const OUTPUTS_DIR: &str = "outputs";

/// One upload request's isolated unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,
    pub output_dir: PathBuf,
}

/// Filesystem layout shared by every request.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

/// What a retention sweep removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub tasks_removed: usize,
    pub uploads_removed: usize,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join(OUTPUTS_DIR)
    }

    /// Create `uploads/` and `outputs/` if missing.
    pub async fn ensure_layout(&self) -> Result<(), ConvertError> {
        for dir in [self.uploads_dir(), self.outputs_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| ConvertError::workspace(&dir, e))?;
        }
        Ok(())
    }

    /// Allocate a fresh task and create its output directory.
    pub async fn create_task(&self) -> Result<Task, ConvertError> {
        let id = Uuid::new_v4();
        let output_dir = self.outputs_dir().join(id.to_string());
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| ConvertError::workspace(&output_dir, e))?;
        debug!("Created task {} at {}", id, output_dir.display());
        Ok(Task { id, output_dir })
    }

    /// Existing output directory for `task_id`.
    pub async fn task_dir(&self, task_id: &Uuid) -> Option<PathBuf> {
        let dir = self.outputs_dir().join(task_id.to_string());
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Some(dir),
            _ => None,
        }
    }

    /// Resolve a downloadable artifact, refusing anything outside the task directory.
    pub async fn artifact_path(
        &self,
        task_id: &str,
        file_name: &str,
    ) -> Result<PathBuf, ConvertError> {
        let not_found = || ConvertError::NotFound {
            task_id: task_id.to_string(),
            file_name: file_name.to_string(),
        };

        let id = Uuid::parse_str(task_id).map_err(|_| not_found())?;
        if !is_plain_file_name(file_name) {
            return Err(not_found());
        }
        let dir = self.task_dir(&id).await.ok_or_else(not_found)?;
        let path = dir.join(file_name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(not_found()),
        }
    }

    /// Delete task directories and staged uploads last modified more than `max_age` ago.
    pub async fn evict_older_than(
        &self,
        max_age: Duration,
    ) -> Result<EvictionReport, ConvertError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let report = EvictionReport {
            tasks_removed: sweep(&self.outputs_dir(), cutoff).await?,
            uploads_removed: sweep(&self.uploads_dir(), cutoff).await?,
        };

        if report.tasks_removed > 0 || report.uploads_removed > 0 {
            info!(
                "Retention sweep removed {} task entries and {} staged uploads",
                report.tasks_removed, report.uploads_removed
            );
        }
        Ok(report)
    }
}

/// True for a single, non-special path component.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

async fn sweep(dir: &Path, cutoff: SystemTime) -> Result<usize, ConvertError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(ConvertError::workspace(dir, e)),
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConvertError::workspace(dir, e))?
    {
        let path = entry.path();
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let modified = meta.modified().unwrap_or(SystemTime::now());
        if modified >= cutoff {
            continue;
        }

        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to evict {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}
