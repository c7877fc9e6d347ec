//! Operation routing
//!
//! Dispatches staged files to capabilities and collects the artifacts they
//! produce inside the task directory. Merge consumes every input at once;
//! batch operations convert inputs one by one in submission order and stop
//! at the first failure. Outputs written before a failure stay on disk.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::capability::{derived_file_name, Capability, CapabilityRegistry, OutputContract};
use crate::error::{CapabilityError, ConvertError, ValidationError};
use crate::intake::{sanitize_filename, StagedFile};
use crate::operation::{ConversionOperation, OperationKind};
use crate::workspace::Task;

/// Name of the single artifact produced by a merge
pub const MERGED_FILE_NAME: &str = "merged_output.pdf";

/// Appended to the input stem to name a batch artifact
pub const CONVERTED_SUFFIX: &str = "_converted";

/// One converted output file belonging to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
}

impl Artifact {
    fn new(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, file_name }
    }
}

pub struct OperationRouter {
    registry: CapabilityRegistry,
}

impl OperationRouter {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// Convert `files` for `operation`, writing into `task`'s output directory.
    ///
    /// Artifacts are returned in the order the inputs were processed.
    pub async fn route(
        &self,
        operation: ConversionOperation,
        files: &[StagedFile],
        task: &Task,
    ) -> Result<Vec<Artifact>, ConvertError> {
        if files.is_empty() {
            return Err(ValidationError::MissingInput.into());
        }

        info!(
            "Task {}: {} on {} file(s)",
            task.id,
            operation,
            files.len()
        );

        match operation.kind() {
            OperationKind::Merge => Ok(vec![self.merge(files, task).await?]),
            OperationKind::Batch => self.convert_each(operation, files, task).await,
        }
    }

    async fn merge(&self, files: &[StagedFile], task: &Task) -> Result<Artifact, ConvertError> {
        let merger = self.registry.merger();
        let inputs: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        let output = task.output_dir.join(MERGED_FILE_NAME);

        merger
            .merge(&inputs, &output)
            .await
            .map_err(|err| match err {
                CapabilityError::InvalidInput { index, reason } => ConvertError::Conversion {
                    file: files
                        .get(index)
                        .map(|f| f.original_name.clone())
                        .unwrap_or_default(),
                    reason,
                },
                other => {
                    let names: Vec<&str> =
                        files.iter().map(|f| f.original_name.as_str()).collect();
                    ConvertError::from_capability(merger.name(), &names.join(", "), other)
                }
            })?;

        ensure_produced(&output, MERGED_FILE_NAME).await?;
        Ok(Artifact::new(output))
    }

    async fn convert_each(
        &self,
        operation: ConversionOperation,
        files: &[StagedFile],
        task: &Task,
    ) -> Result<Vec<Artifact>, ConvertError> {
        let mut artifacts = Vec::with_capacity(files.len());
        for file in files {
            let capability = self
                .registry
                .resolve(operation, &file.extension)
                .ok_or_else(|| ValidationError::UnsupportedFormat {
                    file: file.original_name.clone(),
                })?;
            let artifact = convert_one(capability.as_ref(), file, task).await?;
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }
}

async fn convert_one(
    capability: &dyn Capability,
    file: &StagedFile,
    task: &Task,
) -> Result<Artifact, ConvertError> {
    let extension = capability.target_extension();
    let file_name = unique_output_name(&task.output_dir, &file.original_name, extension).await;
    let output = task.output_dir.join(&file_name);
    let to_request_error =
        |err| ConvertError::from_capability(capability.name(), &file.original_name, err);

    debug!(
        "Converting {} with {} -> {}",
        file.path.display(),
        capability.name(),
        output.display()
    );

    match capability.output_contract() {
        OutputContract::File => {
            capability
                .convert(&file.path, &output)
                .await
                .map_err(to_request_error)?;
        }
        OutputContract::Directory => {
            capability
                .convert(&file.path, &task.output_dir)
                .await
                .map_err(to_request_error)?;

            // The capability names its output after the staged input.
            let expected = derived_file_name(&file.path, extension)
                .map(|name| task.output_dir.join(name))
                .ok_or_else(|| ConvertError::Conversion {
                    file: file.original_name.clone(),
                    reason: "staged input has no usable file name".into(),
                })?;
            ensure_produced(&expected, &file.original_name).await?;
            tokio::fs::rename(&expected, &output)
                .await
                .map_err(|e| ConvertError::workspace(&output, e))?;
        }
    }

    ensure_produced(&output, &file.original_name).await?;
    Ok(Artifact {
        path: output,
        file_name,
    })
}

async fn ensure_produced(path: &Path, file: &str) -> Result<(), ConvertError> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    Err(ConvertError::Conversion {
        file: file.to_string(),
        reason: format!(
            "expected output {} was not produced",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ),
    })
}

/// `<stem>_converted.<ext>`, with `_2`, `_3`, … appended when the name is taken.
async fn unique_output_name(dir: &Path, original_name: &str, extension: &str) -> String {
    let sanitized = sanitize_filename(original_name);
    let stem = Path::new(&sanitized)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(sanitized);

    let mut candidate = format!("{}{}.{}", stem, CONVERTED_SUFFIX, extension);
    let mut n = 2;
    while tokio::fs::try_exists(dir.join(&candidate))
        .await
        .unwrap_or(false)
    {
        candidate = format!("{}{}_{}.{}", stem, CONVERTED_SUFFIX, n, extension);
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::intake::{self, UploadedFile};
    use crate::merge::tests::{create_test_pdf, page_labels};
    use crate::merge::LopdfMerger;
    use crate::workspace::Workspace;

    /// Copies its input, optionally failing on inputs whose name contains `fail_on`.
    struct FakeCapability {
        extension: &'static str,
        contract: OutputContract,
        fail_on: Option<&'static str>,
        unavailable: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeCapability {
        fn new(extension: &'static str) -> Self {
            Self {
                extension,
                contract: OutputContract::File,
                fail_on: None,
                unavailable: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Capability for FakeCapability {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn target_extension(&self) -> &'static str {
            self.extension
        }

        fn output_contract(&self) -> OutputContract {
            self.contract
        }

        async fn convert(&self, input: &Path, output: &Path) -> Result<(), CapabilityError> {
            let input_name = input.file_name().unwrap().to_string_lossy().into_owned();
            self.calls.lock().unwrap().push(input_name.clone());
            if self.unavailable {
                return Err(CapabilityError::Unavailable("office suite missing".into()));
            }
            if self.fail_on.is_some_and(|needle| input_name.contains(needle)) {
                return Err(CapabilityError::Failed("corrupt input".into()));
            }
            let target = match self.contract {
                OutputContract::File => output.to_path_buf(),
                OutputContract::Directory => {
                    output.join(derived_file_name(input, self.extension).unwrap())
                }
            };
            tokio::fs::copy(input, target).await?;
            Ok(())
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        workspace: Workspace,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let workspace = Workspace::new(root.path());
            Self {
                _root: root,
                workspace,
            }
        }

        async fn stage(&self, operation: &str, files: Vec<UploadedFile>) -> Vec<StagedFile> {
            let upload = intake::validate(Some(operation), files).unwrap();
            intake::stage(&self.workspace, upload.files).await.unwrap()
        }
    }

    fn router_with(operation: ConversionOperation, cap: Arc<FakeCapability>) -> OperationRouter {
        OperationRouter::new(
            CapabilityRegistry::new(Arc::new(LopdfMerger)).register(operation, cap),
        )
    }

    fn dir_listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_single_pdf_to_word_is_named_after_upload() {
        let fx = Fixture::new();
        let staged = fx
            .stage("pdf_to_word", vec![UploadedFile::new("report.pdf", b"%PDF".to_vec())])
            .await;
        let task = fx.workspace.create_task().await.unwrap();
        let router = router_with(
            ConversionOperation::PdfToWord,
            Arc::new(FakeCapability::new("docx")),
        );

        let artifacts = router
            .route(ConversionOperation::PdfToWord, &staged, &task)
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].file_name, "report_converted.docx");
        assert_eq!(artifacts[0].path, task.output_dir.join("report_converted.docx"));
        assert!(artifacts[0].path.is_file());
    }

    #[tokio::test]
    async fn test_batch_preserves_submission_order() {
        let fx = Fixture::new();
        let staged = fx
            .stage(
                "jpg_to_pdf",
                vec![
                    UploadedFile::new("c.png", b"c".to_vec()),
                    UploadedFile::new("a.jpg", b"a".to_vec()),
                    UploadedFile::new("b.jpeg", b"b".to_vec()),
                ],
            )
            .await;
        let task = fx.workspace.create_task().await.unwrap();
        let cap = Arc::new(FakeCapability::new("pdf"));
        let router = router_with(ConversionOperation::JpgToPdf, cap.clone());

        let artifacts = router
            .route(ConversionOperation::JpgToPdf, &staged, &task)
            .await
            .unwrap();

        let names: Vec<_> = artifacts.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, vec!["c_converted.pdf", "a_converted.pdf", "b_converted.pdf"]);
        assert_eq!(cap.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_names_get_distinct_artifacts() {
        let fx = Fixture::new();
        let staged = fx
            .stage(
                "pdf_to_word",
                vec![
                    UploadedFile::new("report.pdf", b"one".to_vec()),
                    UploadedFile::new("report.pdf", b"two".to_vec()),
                ],
            )
            .await;
        let task = fx.workspace.create_task().await.unwrap();
        let router = router_with(
            ConversionOperation::PdfToWord,
            Arc::new(FakeCapability::new("docx")),
        );

        let artifacts = router
            .route(ConversionOperation::PdfToWord, &staged, &task)
            .await
            .unwrap();

        assert_eq!(artifacts[0].file_name, "report_converted.docx");
        assert_eq!(artifacts[1].file_name, "report_converted_2.docx");
        assert_eq!(std::fs::read(&artifacts[1].path).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_failure_aborts_batch_and_leaves_earlier_outputs() {
        let fx = Fixture::new();
        let staged = fx
            .stage(
                "ppt_to_pdf",
                vec![
                    UploadedFile::new("good.pptx", b"g".to_vec()),
                    UploadedFile::new("broken.ppt", b"b".to_vec()),
                    UploadedFile::new("never.pptx", b"n".to_vec()),
                ],
            )
            .await;
        let task = fx.workspace.create_task().await.unwrap();
        let cap = Arc::new(FakeCapability {
            fail_on: Some("broken"),
            ..FakeCapability::new("pdf")
        });
        let router = router_with(ConversionOperation::PptToPdf, cap.clone());

        let err = router
            .route(ConversionOperation::PptToPdf, &staged, &task)
            .await
            .unwrap_err();

        match err {
            ConvertError::Conversion { file, .. } => assert_eq!(file, "broken.ppt"),
            other => panic!("expected conversion error, got {:?}", other),
        }
        assert_eq!(cap.calls.lock().unwrap().len(), 2);
        assert_eq!(dir_listing(&task.output_dir), vec!["good_converted.pdf"]);
    }

    #[tokio::test]
    async fn test_unavailable_capability_is_distinct() {
        let fx = Fixture::new();
        let staged = fx
            .stage("ppt_to_pdf", vec![UploadedFile::new("deck.pptx", b"d".to_vec())])
            .await;
        let task = fx.workspace.create_task().await.unwrap();
        let cap = Arc::new(FakeCapability {
            unavailable: true,
            ..FakeCapability::new("pdf")
        });
        let router = router_with(ConversionOperation::PptToPdf, cap);

        let err = router
            .route(ConversionOperation::PptToPdf, &staged, &task)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ConvertError::CapabilityUnavailable { capability: "fake", .. }),
            "{:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_directory_contract_output_is_located_and_renamed() {
        let fx = Fixture::new();
        let staged = fx
            .stage("word_to_pdf", vec![UploadedFile::new("my letter.docx", b"w".to_vec())])
            .await;
        let task = fx.workspace.create_task().await.unwrap();
        let cap = Arc::new(FakeCapability {
            contract: OutputContract::Directory,
            ..FakeCapability::new("pdf")
        });
        let router = router_with(ConversionOperation::WordToPdf, cap);

        let artifacts = router
            .route(ConversionOperation::WordToPdf, &staged, &task)
            .await
            .unwrap();

        assert_eq!(artifacts[0].file_name, "my_letter_converted.pdf");
        assert_eq!(dir_listing(&task.output_dir), vec!["my_letter_converted.pdf"]);
    }

    #[tokio::test]
    async fn test_directory_contract_missing_output_is_conversion_error() {
        struct Silent;

        #[async_trait]
        impl Capability for Silent {
            fn name(&self) -> &'static str {
                "silent"
            }
            fn target_extension(&self) -> &'static str {
                "pdf"
            }
            fn output_contract(&self) -> OutputContract {
                OutputContract::Directory
            }
            async fn convert(&self, _: &Path, _: &Path) -> Result<(), CapabilityError> {
                Ok(())
            }
        }

        let fx = Fixture::new();
        let staged = fx
            .stage("word_to_pdf", vec![UploadedFile::new("a.docx", b"w".to_vec())])
            .await;
        let task = fx.workspace.create_task().await.unwrap();
        let router = OperationRouter::new(
            CapabilityRegistry::new(Arc::new(LopdfMerger))
                .register(ConversionOperation::WordToPdf, Arc::new(Silent)),
        );

        let err = router
            .route(ConversionOperation::WordToPdf, &staged, &task)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Conversion { ref file, .. } if file == "a.docx"));
    }

    #[tokio::test]
    async fn test_merge_appends_in_submission_order() {
        let fx = Fixture::new();
        let staged = fx
            .stage(
                "merge_pdfs",
                vec![
                    UploadedFile::new("a.pdf", create_test_pdf(2, "A")),
                    UploadedFile::new("b.pdf", create_test_pdf(1, "B")),
                ],
            )
            .await;
        let task = fx.workspace.create_task().await.unwrap();
        let router = OperationRouter::new(CapabilityRegistry::new(Arc::new(LopdfMerger)));

        let artifacts = router
            .route(ConversionOperation::MergePdfs, &staged, &task)
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].file_name, MERGED_FILE_NAME);
        let merged = std::fs::read(&artifacts[0].path).unwrap();
        assert_eq!(page_labels(&merged), vec!["A-Page-1", "A-Page-2", "B-Page-1"]);
    }

    #[tokio::test]
    async fn test_merge_names_corrupt_input() {
        let fx = Fixture::new();
        let staged = fx
            .stage(
                "merge_pdfs",
                vec![
                    UploadedFile::new("a.pdf", create_test_pdf(1, "A")),
                    UploadedFile::new("b.pdf", b"not a pdf".to_vec()),
                ],
            )
            .await;
        let task = fx.workspace.create_task().await.unwrap();
        let router = OperationRouter::new(CapabilityRegistry::new(Arc::new(LopdfMerger)));

        let err = router
            .route(ConversionOperation::MergePdfs, &staged, &task)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Conversion { ref file, .. } if file == "b.pdf"));
        assert!(dir_listing(&task.output_dir).is_empty());
    }

    #[tokio::test]
    async fn test_same_input_in_two_tasks_is_independent() {
        let fx = Fixture::new();
        let router = router_with(
            ConversionOperation::PdfToWord,
            Arc::new(FakeCapability::new("docx")),
        );

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let staged = fx
                .stage("pdf_to_word", vec![UploadedFile::new("same.pdf", b"x".to_vec())])
                .await;
            let task = fx.workspace.create_task().await.unwrap();
            let artifacts = router
                .route(ConversionOperation::PdfToWord, &staged, &task)
                .await
                .unwrap();
            outputs.push(artifacts[0].path.clone());
        }

        assert_ne!(outputs[0], outputs[1]);
        assert_ne!(outputs[0].parent(), outputs[1].parent());
        assert!(outputs.iter().all(|p| p.is_file()));
    }
}
