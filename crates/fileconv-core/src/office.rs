//! Office-suite backed capabilities
//!
//! PDF→docx, docx→PDF and presentation→PDF are delegated to a headless
//! LibreOffice (`soffice`) process. Each invocation runs with its own
//! throwaway user profile and is killed when it exceeds the configured
//! timeout. On unix the launcher runs in its own process group so the
//! `soffice.bin` it forks is killed with it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::capability::{derived_file_name, Capability, OutputContract};
use crate::error::CapabilityError;

/// Default per-conversion timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Location and limits of the external office suite.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Path or command name of the `soffice` binary
    pub soffice_path: PathBuf,
    /// Upper bound for a single conversion
    pub timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            soffice_path: PathBuf::from("soffice"),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Conversion performed by an [`OfficeConverter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeTarget {
    PdfToDocx,
    DocumentToPdf,
    PresentationToPdf,
}

impl OfficeTarget {
    fn input_filter(&self) -> Option<&'static str> {
        match self {
            OfficeTarget::PdfToDocx => Some("writer_pdf_import"),
            _ => None,
        }
    }

    fn convert_to(&self) -> &'static str {
        match self {
            OfficeTarget::PdfToDocx => "docx:MS Word 2007 XML",
            OfficeTarget::DocumentToPdf => "pdf:writer_pdf_Export",
            OfficeTarget::PresentationToPdf => "pdf:impress_pdf_Export",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            OfficeTarget::PdfToDocx => "docx",
            OfficeTarget::DocumentToPdf | OfficeTarget::PresentationToPdf => "pdf",
        }
    }
}

/// Capability that shells out to `soffice --headless --convert-to`.
pub struct OfficeConverter {
    tools: Arc<ToolConfig>,
    target: OfficeTarget,
}

impl OfficeConverter {
    pub fn new(tools: Arc<ToolConfig>, target: OfficeTarget) -> Self {
        Self { tools, target }
    }

    /// Run soffice, leaving `<input stem>.<ext>` in `outdir`.
    async fn run(&self, input: &Path, outdir: &Path) -> Result<(), CapabilityError> {
        let profile = tempfile::Builder::new()
            .prefix("fileconv-profile-")
            .tempdir()?;

        let mut command = std::process::Command::new(&self.tools.soffice_path);
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        command
            .arg(format!(
                "-env:UserInstallation={}",
                file_url(profile.path())
            ))
            .args(["--headless", "--norestore", "--nolockcheck"]);
        if let Some(filter) = self.target.input_filter() {
            command.arg(format!("--infilter={}", filter));
        }
        command
            .arg("--convert-to")
            .arg(self.target.convert_to())
            .arg("--outdir")
            .arg(outdir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut command = Command::from(command);
        command.kill_on_drop(true);

        debug!(
            "Running {} for {} -> {}",
            self.tools.soffice_path.display(),
            input.display(),
            outdir.display()
        );

        let child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => CapabilityError::Unavailable(
                format!("cannot launch {}: {}", self.tools.soffice_path.display(), e),
            ),
            _ => CapabilityError::Failed(format!("failed to start office suite: {}", e)),
        })?;

        let pid = child.id();
        let wait = child.wait_with_output();
        tokio::pin!(wait);

        // Dropping the child on timeout kills it; the rest of its group goes first.
        let output = match tokio::time::timeout(self.tools.timeout, &mut wait).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                kill_process_group(pid);
                return Err(CapabilityError::TimedOut(self.tools.timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Failed(format!(
                "office suite exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Capability for OfficeConverter {
    fn name(&self) -> &'static str {
        match self.target {
            OfficeTarget::PdfToDocx => "office-pdf-to-docx",
            OfficeTarget::DocumentToPdf => "office-document-to-pdf",
            OfficeTarget::PresentationToPdf => "office-presentation-to-pdf",
        }
    }

    fn target_extension(&self) -> &'static str {
        self.target.extension()
    }

    fn output_contract(&self) -> OutputContract {
        match self.target {
            OfficeTarget::DocumentToPdf => OutputContract::Directory,
            _ => OutputContract::File,
        }
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), CapabilityError> {
        if self.output_contract() == OutputContract::Directory {
            return self.run(input, output).await;
        }

        // soffice only writes into a directory; convert next to the target and move it.
        let parent = output
            .parent()
            .ok_or_else(|| CapabilityError::Failed("output path has no parent".into()))?;
        let scratch = tempfile::Builder::new()
            .prefix(".soffice-")
            .tempdir_in(parent)?;
        self.run(input, scratch.path()).await?;

        let produced = derived_file_name(input, self.target.extension())
            .map(|name| scratch.path().join(name))
            .ok_or_else(|| CapabilityError::Failed("input path has no file name".into()))?;
        if !tokio::fs::try_exists(&produced).await.unwrap_or(false) {
            return Err(CapabilityError::Failed(
                "office suite reported success but produced no output".into(),
            ));
        }
        tokio::fs::rename(&produced, output).await?;
        Ok(())
    }
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg has no memory effects; pgid is the group created at spawn.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        tracing::warn!(
            "Failed to kill process group {}: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// `file://` URL for a local directory, as soffice expects for `UserInstallation`.
fn file_url(path: &Path) -> String {
    let display = path.to_string_lossy().replace('\\', "/");
    if display.starts_with('/') {
        format!("file://{}", display)
    } else {
        format!("file:///{}", display)
    }
}
