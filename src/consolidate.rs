//! Metadata consolidation.
//!
//! Consolidation gathers the dataset schema and the populated chunk keys of
//! every variable into a single manifest document at the store root, so a
//! consumer can learn the full dataset layout from one read instead of a
//! directory walk. Consolidating an unchanged store rewrites a byte-identical
//! manifest: variables are keyed through an ordered map and chunk lists are
//! sorted, so the encoding is deterministic.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::schema::DatasetSchema;
use crate::store::Store;

/// The name of the consolidated manifest at the store root.
pub const CONSOLIDATED_METADATA: &str = "manifest.json";

/// The manifest format version this crate writes.
const MANIFEST_VERSION: u32 = 1;

/// A consolidated view of a store: the schema plus every populated chunk key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version of the manifest document.
    pub manifest_version: u32,
    /// The dataset schema, embedded verbatim.
    pub dataset: DatasetSchema,
    /// Sorted populated chunk keys per variable.
    pub chunks: BTreeMap<String, Vec<Vec<u64>>>,
}

/// Build the manifest for `store` and write it to `manifest.json` at the
/// store root, atomically, replacing any previous manifest.
///
/// # Errors
/// Returns an error if the chunk listing or the write fails.
pub fn consolidate_metadata(store: &Store) -> Result<Manifest, StoreError> {
    let mut chunks = BTreeMap::new();
    for variable in &store.schema().variables {
        chunks.insert(variable.name.clone(), store.list_chunks(&variable.name)?);
    }
    let manifest = Manifest {
        manifest_version: MANIFEST_VERSION,
        dataset: store.schema().clone(),
        chunks,
    };
    store.write_document(CONSOLIDATED_METADATA, &manifest)?;
    Ok(manifest)
}

impl Store {
    /// Open a store through its consolidated manifest.
    ///
    /// Reads the schema from `manifest.json` in a single metadata read; a
    /// store that was never consolidated falls back to [`Store::open`].
    ///
    /// # Errors
    /// Returns [`StoreError::StoreNotFound`] if neither document exists, or
    /// an error if the manifest is unreadable or its schema invalid.
    pub fn open_consolidated(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let manifest_path = root.join(CONSOLIDATED_METADATA);
        if !manifest_path.is_file() {
            return Store::open(root);
        }
        let manifest: Manifest = serde_json::from_slice(&fs::read(manifest_path)?)?;
        manifest.dataset.validate()?;
        Ok(Store::from_parts(root, manifest.dataset))
    }
}
