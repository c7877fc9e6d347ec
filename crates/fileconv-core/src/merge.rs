//! PDF Merge algorithm
//!
//! Appends the pages of several PDFs into one document, in input order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lopdf::{Document, Object, ObjectId};
use thiserror::Error;
use tracing::debug;

use crate::capability::MergeCapability;
use crate::error::CapabilityError;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("No documents to merge")]
    Empty,

    #[error("Failed to load document {index}: {reason}")]
    Parse { index: usize, reason: String },

    #[error("PDF operation failed: {0}")]
    Operation(String),
}

impl From<MergeError> for CapabilityError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Parse { index, reason } => CapabilityError::InvalidInput { index, reason },
            other => CapabilityError::Failed(other.to_string()),
        }
    }
}

/// Merge capability backed by [`merge_documents`].
pub struct LopdfMerger;

#[async_trait]
impl MergeCapability for LopdfMerger {
    fn name(&self) -> &'static str {
        "lopdf-merge"
    }

    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), CapabilityError> {
        let mut documents = Vec::with_capacity(inputs.len());
        for input in inputs {
            documents.push(tokio::fs::read(input).await?);
        }

        let merged = tokio::task::spawn_blocking(move || merge_documents(documents))
            .await
            .map_err(|e| CapabilityError::Failed(format!("merge task panicked: {}", e)))??;

        debug!(
            "Merged {} documents into {} ({} bytes)",
            inputs.len(),
            output.display(),
            merged.len()
        );
        tokio::fs::write(output, merged).await?;
        Ok(())
    }
}

/// Merge multiple PDFs into one
///
/// The algorithm:
/// 1. If empty, return error
/// 2. If single document, validate it and return it as-is
/// 3. Use the first document as the destination
/// 4. For each remaining source document:
///    a. Calculate ID offset to avoid conflicts
///    b. Import all objects with remapped IDs
///    c. Append pages to the destination
/// 5. Compress and return the merged result
pub fn merge_documents(documents: Vec<Vec<u8>>) -> Result<Vec<u8>, MergeError> {
    let mut documents = documents.into_iter();
    let first = documents.next().ok_or(MergeError::Empty)?;

    let mut dest = load(&first, 0)?;
    let rest: Vec<Vec<u8>> = documents.collect();
    if rest.is_empty() {
        return Ok(first);
    }

    let mut dest_max_id = dest.max_id;
    let mut dest_page_refs = get_page_references(&dest);

    for (i, source_bytes) in rest.iter().enumerate() {
        let source = load(source_bytes, i + 1)?;

        // Get source pages before we start modifying the document
        let source_pages = get_page_references(&source);

        // Calculate offset for object IDs to avoid conflicts
        let id_offset = dest_max_id;

        // Remap all object IDs in the source document
        let mut remapped_objects = BTreeMap::new();
        for (old_id, object) in source.objects.into_iter() {
            let new_id = (old_id.0 + id_offset, old_id.1);
            remapped_objects.insert(new_id, remap_object_refs(object, id_offset));
        }
        dest.objects.extend(remapped_objects);

        for old_page_ref in source_pages {
            dest_page_refs.push((old_page_ref.0 + id_offset, old_page_ref.1));
        }

        dest_max_id = (source.max_id + id_offset).max(dest_max_id);
    }

    update_page_tree(&mut dest, dest_page_refs)?;
    dest.max_id = dest_max_id;

    dest.compress();

    let mut buffer = Vec::new();
    dest.save_to(&mut buffer)
        .map_err(|e| MergeError::Operation(format!("Failed to save merged PDF: {}", e)))?;

    Ok(buffer)
}

fn load(bytes: &[u8], index: usize) -> Result<Document, MergeError> {
    let doc = Document::load_mem(bytes).map_err(|e| MergeError::Parse {
        index,
        reason: e.to_string(),
    })?;
    if doc.get_pages().is_empty() {
        return Err(MergeError::Parse {
            index,
            reason: "document has no pages".into(),
        });
    }
    Ok(doc)
}

/// Page object references in page-number order
fn get_page_references(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().values().copied().collect()
}

/// Recursively remap object references in an object
fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(arr) => Object::Array(
            arr.into_iter()
                .map(|o| remap_object_refs(o, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}

/// Point the destination's root page node at `page_refs`
fn update_page_tree(doc: &mut Document, page_refs: Vec<ObjectId>) -> Result<(), MergeError> {
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| MergeError::Operation("No Root reference in trailer".into()))?;

    let pages_id = doc
        .objects
        .get(&catalog_id)
        .ok_or_else(|| MergeError::Operation("Catalog not found".into()))?
        .as_dict()
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(|_| MergeError::Operation("No Pages reference in catalog".into()))?;

    let Some(Object::Dictionary(pages_dict)) = doc.objects.get_mut(&pages_id) else {
        return Err(MergeError::Operation("Invalid pages dictionary".into()));
    };

    let count = page_refs.len() as i64;
    let kids = page_refs.into_iter().map(Object::Reference).collect();
    pages_dict.set("Kids", Object::Array(kids));
    pages_dict.set("Count", Object::Integer(count));

    Ok(())
}
