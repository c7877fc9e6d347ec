//! Conversion capability interface
//!
//! Every converter the router can call implements [`Capability`] (one input,
//! one output) or [`MergeCapability`] (many inputs, one output). The
//! [`CapabilityRegistry`] is the `(operation, extension) -> capability`
//! lookup table the router dispatches through.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::image_pdf::ImageToPdf;
use crate::merge::LopdfMerger;
use crate::office::{OfficeConverter, OfficeTarget, ToolConfig};
use crate::operation::{ConversionOperation, OperationKind};

/// Where a capability writes its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputContract {
    /// `output` is the exact file path to write.
    File,
    /// `output` is a directory; the capability names the file after its input.
    Directory,
}

/// File name a directory-contract capability writes for `input`:
/// the input's stem with `extension` appended.
pub fn derived_file_name(input: &Path, extension: &str) -> Option<String> {
    let stem = input.file_stem()?.to_str()?;
    Some(format!("{}.{}", stem, extension))
}

/// A single-input converter.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Short identifier used in logs and errors
    fn name(&self) -> &'static str;

    /// Extension (without dot) of the files this capability produces
    fn target_extension(&self) -> &'static str;

    fn output_contract(&self) -> OutputContract {
        OutputContract::File
    }

    /// Convert `input`, writing to `output` as described by [`Self::output_contract`].
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), CapabilityError>;
}

/// A converter that combines several inputs into one output, preserving order.
#[async_trait]
pub trait MergeCapability: Send + Sync {
    fn name(&self) -> &'static str;

    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), CapabilityError>;
}

/// Lookup table from `(operation, extension)` to the capability that serves it.
#[derive(Clone)]
pub struct CapabilityRegistry {
    batch: HashMap<(ConversionOperation, &'static str), Arc<dyn Capability>>,
    merger: Arc<dyn MergeCapability>,
}

impl CapabilityRegistry {
    /// Empty table with the given merge capability.
    pub fn new(merger: Arc<dyn MergeCapability>) -> Self {
        Self {
            batch: HashMap::new(),
            merger,
        }
    }

    /// Registry wired to the office suite, the image encoder and the lopdf merger.
    pub fn with_defaults(tools: ToolConfig) -> Self {
        let tools = Arc::new(tools);
        let pdf_to_word: Arc<dyn Capability> =
            Arc::new(OfficeConverter::new(tools.clone(), OfficeTarget::PdfToDocx));
        let word_to_pdf: Arc<dyn Capability> =
            Arc::new(OfficeConverter::new(tools.clone(), OfficeTarget::DocumentToPdf));
        let ppt_to_pdf: Arc<dyn Capability> =
            Arc::new(OfficeConverter::new(tools, OfficeTarget::PresentationToPdf));
        let image_to_pdf: Arc<dyn Capability> = Arc::new(ImageToPdf);

        Self::new(Arc::new(LopdfMerger))
            .register(ConversionOperation::PdfToWord, pdf_to_word)
            .register(ConversionOperation::WordToPdf, word_to_pdf)
            .register(ConversionOperation::PptToPdf, ppt_to_pdf)
            .register(ConversionOperation::JpgToPdf, image_to_pdf)
    }

    /// Register `capability` for every extension `operation` accepts.
    ///
    /// Merge operations are served by the merge capability and are ignored here.
    pub fn register(
        mut self,
        operation: ConversionOperation,
        capability: Arc<dyn Capability>,
    ) -> Self {
        if operation.kind() == OperationKind::Merge {
            return self;
        }
        for ext in operation.accepted_extensions() {
            self.batch.insert((operation, *ext), capability.clone());
        }
        self
    }

    /// Capability for one input of a batch operation.
    pub fn resolve(
        &self,
        operation: ConversionOperation,
        extension: &str,
    ) -> Option<Arc<dyn Capability>> {
        let ext = extension.to_ascii_lowercase();
        operation
            .accepted_extensions()
            .iter()
            .find(|accepted| **accepted == ext)
            .and_then(|accepted| self.batch.get(&(operation, *accepted)))
            .cloned()
    }

    pub fn merger(&self) -> Arc<dyn MergeCapability> {
        self.merger.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Capability for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn target_extension(&self) -> &'static str {
            "pdf"
        }

        async fn convert(&self, _input: &Path, _output: &Path) -> Result<(), CapabilityError> {
            Ok(())
        }
    }

    #[test]
    fn test_derived_file_name() {
        assert_eq!(
            derived_file_name(Path::new("/tmp/uploads/abc_report.docx"), "pdf").as_deref(),
            Some("abc_report.pdf")
        );
        assert_eq!(
            derived_file_name(Path::new("notes.v2.docx"), "pdf").as_deref(),
            Some("notes.v2.pdf")
        );
    }

    #[test]
    fn test_register_covers_every_accepted_extension() {
        let registry = CapabilityRegistry::new(Arc::new(LopdfMerger))
            .register(ConversionOperation::JpgToPdf, Arc::new(Noop));

        for ext in ["jpg", "jpeg", "png", "PNG"] {
            assert!(registry.resolve(ConversionOperation::JpgToPdf, ext).is_some());
        }
        assert!(registry.resolve(ConversionOperation::JpgToPdf, "gif").is_none());
        assert!(registry.resolve(ConversionOperation::PdfToWord, "pdf").is_none());
    }

    #[test]
    fn test_merge_is_not_a_batch_entry() {
        let registry = CapabilityRegistry::new(Arc::new(LopdfMerger))
            .register(ConversionOperation::MergePdfs, Arc::new(Noop));
        assert!(registry.resolve(ConversionOperation::MergePdfs, "pdf").is_none());
        assert_eq!(registry.merger().name(), "lopdf-merge");
    }

    #[test]
    fn test_defaults_serve_every_batch_operation() {
        let registry = CapabilityRegistry::with_defaults(ToolConfig::default());
        for op in ConversionOperation::ALL {
            if op.kind() == OperationKind::Merge {
                continue;
            }
            for ext in op.accepted_extensions() {
                let cap = registry.resolve(op, ext).expect("registered");
                assert!(!cap.name().is_empty());
            }
        }
        let word = registry.resolve(ConversionOperation::WordToPdf, "docx").unwrap();
        assert_eq!(word.output_contract(), OutputContract::Directory);
        assert_eq!(word.target_extension(), "pdf");
        let to_docx = registry.resolve(ConversionOperation::PdfToWord, "pdf").unwrap();
        assert_eq!(to_docx.target_extension(), "docx");
    }
}
