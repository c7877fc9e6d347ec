//! Result packaging
//!
//! One artifact is returned as-is. Several artifacts are bundled into a flat
//! zip archive written next to them in the task directory, so every artifact
//! stays reachable either way.

use std::fs::File;
use std::io;
use std::path::Path;

use tracing::debug;
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::error::{ConvertError, ValidationError};
use crate::router::Artifact;
use crate::workspace::Task;

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const ZIP_MIME: &str = "application/zip";
pub const OCTET_STREAM_MIME: &str = "application/octet-stream";

/// What the upload response carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePackage {
    /// Exactly one artifact, returned directly
    Single(Artifact),
    /// Zip archive bundling every artifact of the task
    Archive { archive: Artifact, entries: usize },
}

impl ResponsePackage {
    /// The file to stream back to the client
    pub fn artifact(&self) -> &Artifact {
        match self {
            ResponsePackage::Single(artifact) => artifact,
            ResponsePackage::Archive { archive, .. } => archive,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ResponsePackage::Single(artifact) => content_type_for(&artifact.file_name),
            ResponsePackage::Archive { .. } => ZIP_MIME,
        }
    }
}

/// MIME type guessed from a file name's extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    match crate::operation::extension_of(file_name).as_str() {
        "pdf" => PDF_MIME,
        "docx" => DOCX_MIME,
        "zip" => ZIP_MIME,
        _ => OCTET_STREAM_MIME,
    }
}

/// File name of the archive built for `task`
pub fn archive_name(task: &Task) -> String {
    format!("{}_converted.zip", task.id)
}

/// Decide how `artifacts` are returned, building an archive when there is more than one.
pub async fn package(
    task: &Task,
    artifacts: Vec<Artifact>,
) -> Result<ResponsePackage, ConvertError> {
    match artifacts.len() {
        0 => Err(ValidationError::MissingInput.into()),
        1 => Ok(ResponsePackage::Single(
            artifacts.into_iter().next().ok_or(ValidationError::MissingInput)?,
        )),
        entries => {
            let name = archive_name(task);
            let path = task.output_dir.join(&name);
            let target = path.clone();
            tokio::task::spawn_blocking(move || write_zip(&target, &artifacts))
                .await
                .map_err(|e| ConvertError::workspace(&path, io::Error::other(e)))?
                .map_err(|e| ConvertError::workspace(&path, io::Error::other(e)))?;

            debug!("Packaged {} artifacts into {}", entries, path.display());
            Ok(ResponsePackage::Archive {
                archive: Artifact {
                    path,
                    file_name: name,
                },
                entries,
            })
        }
    }
}

/// Write a flat zip with one entry per artifact, named by its basename.
fn write_zip(path: &Path, artifacts: &[Artifact]) -> zip::result::ZipResult<()> {
    let mut zip = ZipWriter::new(File::create(path)?);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for artifact in artifacts {
        zip.start_file(entry_name(&artifact.path, &artifact.file_name), options)?;
        let mut source = File::open(&artifact.path)?;
        io::copy(&mut source, &mut zip)?;
    }

    zip.finish()?;
    Ok(())
}

fn entry_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}
