//! Upload intake: validation, filename sanitization and staging
//!
//! The whole submission is validated before anything touches the disk, so
//! a rejected request never leaves a task directory or staged upload behind.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ConvertError, ValidationError};
use crate::operation::{extension_of, ConversionOperation, OperationKind};
use crate::workspace::Workspace;

/// Longest sanitized name kept, in UTF-8 bytes.
///
/// Leaves room under the common 255-byte component limit for the 33-byte
/// staging prefix and the `_converted_N` output suffix.
pub const MAX_NAME_BYTES: usize = 200;

/// A file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client-supplied name; untrusted, used as a display label only
    pub original_name: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(original_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            original_name: original_name.into(),
            data: data.into(),
        }
    }
}

/// A file that passed validation for the requested operation.
#[derive(Debug, Clone)]
pub struct AcceptedFile {
    pub original_name: String,
    /// Lower-cased extension without the dot
    pub extension: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub operation: ConversionOperation,
    pub files: Vec<AcceptedFile>,
}

/// A file persisted to the staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub original_name: String,
    pub extension: String,
    pub path: PathBuf,
}

/// Check the operation and every file against the extension table.
///
/// Merge requires every file to be a PDF. Batch operations skip files with a
/// blank name; any other mismatch rejects the entire submission.
pub fn validate(
    operation: Option<&str>,
    files: Vec<UploadedFile>,
) -> Result<ValidatedUpload, ValidationError> {
    let operation = match operation.map(str::trim) {
        Some(op) if !op.is_empty() => op.parse::<ConversionOperation>()?,
        _ => return Err(ValidationError::MissingInput),
    };
    if files.is_empty() {
        return Err(ValidationError::MissingInput);
    }

    let mut accepted = Vec::with_capacity(files.len());
    for file in files {
        let blank = file.original_name.trim().is_empty();
        if blank && operation.kind() == OperationKind::Batch {
            continue;
        }

        let extension = extension_of(&file.original_name);
        if blank || !operation.accepts(&extension) {
            return Err(ValidationError::UnsupportedFormat {
                file: file.original_name,
            });
        }

        accepted.push(AcceptedFile {
            original_name: file.original_name,
            extension,
            data: file.data,
        });
    }

    if accepted.is_empty() {
        return Err(ValidationError::MissingInput);
    }

    Ok(ValidatedUpload {
        operation,
        files: accepted,
    })
}

/// Write every accepted file to the staging area under a collision-free name.
pub async fn stage(
    workspace: &Workspace,
    files: Vec<AcceptedFile>,
) -> Result<Vec<StagedFile>, ConvertError> {
    let uploads = workspace.uploads_dir();
    tokio::fs::create_dir_all(&uploads)
        .await
        .map_err(|e| ConvertError::workspace(&uploads, e))?;

    let mut staged = Vec::with_capacity(files.len());
    for file in files {
        let path = uploads.join(staged_name(&file.original_name));

        let mut handle = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| ConvertError::workspace(&path, e))?;
        handle
            .write_all(&file.data)
            .await
            .map_err(|e| ConvertError::workspace(&path, e))?;
        handle
            .flush()
            .await
            .map_err(|e| ConvertError::workspace(&path, e))?;

        debug!(
            "Staged {} ({} bytes) as {}",
            file.original_name,
            file.data.len(),
            path.display()
        );
        staged.push(StagedFile {
            original_name: file.original_name,
            extension: file.extension,
            path,
        });
    }
    Ok(staged)
}

/// `<random token>_<sanitized name>`
pub fn staged_name(original_name: &str) -> String {
    format!(
        "{}_{}",
        Uuid::new_v4().simple(),
        sanitize_filename(original_name)
    )
}

/// Reduce an untrusted client filename to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, characters that are
/// unsafe on common filesystems become `_`, leading dots are removed and
/// over-long names are shortened while keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_whitespace()
                || c.is_control()
                || matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*')
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        return "upload".to_string();
    }
    truncate_keeping_extension(trimmed, MAX_NAME_BYTES)
}

fn truncate_keeping_extension(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() < max_bytes / 2 => (stem, Some(ext)),
        _ => (name, None),
    };
    let ext_len = ext.map_or(0, |e| e.len() + 1);
    let mut out = floor_char_boundary(stem, max_bytes - ext_len).to_string();
    if let Some(ext) = ext {
        out.push('.');
        out.push_str(ext);
    }
    out
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
fn floor_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
