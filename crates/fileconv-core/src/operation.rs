//! Conversion operations and their accepted input formats

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Operation requested by the client alongside its uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionOperation {
    PdfToWord,
    WordToPdf,
    PptToPdf,
    JpgToPdf,
    MergePdfs,
}

/// Whether inputs are consumed together or one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// All inputs produce a single artifact.
    Merge,
    /// Each input produces its own artifact.
    Batch,
}

impl ConversionOperation {
    pub const ALL: [ConversionOperation; 5] = [
        ConversionOperation::PdfToWord,
        ConversionOperation::WordToPdf,
        ConversionOperation::PptToPdf,
        ConversionOperation::JpgToPdf,
        ConversionOperation::MergePdfs,
    ];

    /// Wire name used in the `operation` form field
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionOperation::PdfToWord => "pdf_to_word",
            ConversionOperation::WordToPdf => "word_to_pdf",
            ConversionOperation::PptToPdf => "ppt_to_pdf",
            ConversionOperation::JpgToPdf => "jpg_to_pdf",
            ConversionOperation::MergePdfs => "merge_pdfs",
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            ConversionOperation::MergePdfs => OperationKind::Merge,
            _ => OperationKind::Batch,
        }
    }

    /// Lower-case extensions (without the dot) this operation accepts.
    pub fn accepted_extensions(&self) -> &'static [&'static str] {
        match self {
            ConversionOperation::PdfToWord => &["pdf"],
            ConversionOperation::WordToPdf => &["docx"],
            ConversionOperation::PptToPdf => &["ppt", "pptx"],
            ConversionOperation::JpgToPdf => &["jpg", "jpeg", "png"],
            ConversionOperation::MergePdfs => &["pdf"],
        }
    }

    pub fn accepts(&self, extension: &str) -> bool {
        self.accepted_extensions()
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }
}

impl fmt::Display for ConversionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionOperation {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ConversionOperation::ALL
            .into_iter()
            .find(|op| op.as_str() == trimmed)
            .ok_or_else(|| ValidationError::UnknownOperation(trimmed.to_string()))
    }
}

/// Lower-cased extension of `filename` without the leading dot.
///
/// Returns an empty string when the name has no extension.
pub fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => String::new(),
    }
}
