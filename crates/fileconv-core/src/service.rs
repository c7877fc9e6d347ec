//! Upload pipeline
//!
//! Runs one submission end to end: validation, task creation, staging,
//! routing and packaging. Nothing touches the disk until the whole
//! submission has passed validation.

use tracing::info;

use crate::error::ConvertError;
use crate::intake::{self, UploadedFile};
use crate::package::{self, ResponsePackage};
use crate::router::OperationRouter;
use crate::workspace::{Task, Workspace};

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOutcome {
    pub task: Task,
    pub package: ResponsePackage,
}

pub struct ConversionService {
    workspace: Workspace,
    router: OperationRouter,
}

impl ConversionService {
    pub fn new(workspace: Workspace, router: OperationRouter) -> Self {
        Self { workspace, router }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Convert `files` with the operation named by `operation`.
    pub async fn process(
        &self,
        operation: Option<&str>,
        files: Vec<UploadedFile>,
    ) -> Result<ConversionOutcome, ConvertError> {
        let upload = intake::validate(operation, files)?;
        let task = self.workspace.create_task().await?;
        let staged = intake::stage(&self.workspace, upload.files).await?;

        let artifacts = self.router.route(upload.operation, &staged, &task).await?;
        let package = package::package(&task, artifacts).await?;

        info!(
            "Task {} complete: {} ({})",
            task.id,
            package.artifact().file_name,
            upload.operation
        );
        Ok(ConversionOutcome { task, package })
    }
}
