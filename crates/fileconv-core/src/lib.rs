//! Task-scoped file conversion
//!
//! This crate turns an upload (one operation plus one or more files) into
//! downloadable artifacts isolated under a per-task directory.
//!
//! The pipeline:
//! - `intake`: validate the whole submission, then stage files under collision-free names
//! - `router`: dispatch staged files to capabilities (merge once, or batch per file)
//! - `package`: return one artifact directly or bundle several into a zip
//!
//! Format conversion itself lives behind [`Capability`] and [`MergeCapability`]:
//! an external office suite for documents and slides, in-process encoders for
//! images and PDF merging.

pub mod capability;
pub mod error;
pub mod image_pdf;
pub mod intake;
pub mod merge;
pub mod office;
pub mod operation;
pub mod package;
pub mod router;
pub mod service;
pub mod workspace;

pub use capability::{Capability, CapabilityRegistry, MergeCapability, OutputContract};
pub use error::{CapabilityError, ConvertError, ValidationError};
pub use intake::{sanitize_filename, StagedFile, UploadedFile};
pub use merge::merge_documents;
pub use office::ToolConfig;
pub use operation::{ConversionOperation, OperationKind};
pub use package::{content_type_for, ResponsePackage};
pub use router::{Artifact, OperationRouter};
pub use service::{ConversionOutcome, ConversionService};
pub use workspace::{EvictionReport, Task, Workspace};
