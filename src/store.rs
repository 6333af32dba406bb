//! The chunked store adapter: a filesystem-backed dataset store.
//!
//! Layout of a store rooted at `<root>`:
//!
//! ```text
//! <root>/dataset.json              dataset schema (dimensions, variables, attributes)
//! <root>/<variable>/c/<i>/<j>/...  one file per chunk, C-order little-endian bytes
//! <root>/manifest.json             consolidated manifest, written on finalisation
//! ```
//!
//! Chunks are written atomically: bytes land in a dot-temporary alongside the
//! destination and are renamed into place, so a concurrent reader observes a
//! chunk either fully written or not at all. A chunk never written reads back
//! as the variable's fill value.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use walkdir::WalkDir;

use crate::chunk_grid::ChunkGrid;
use crate::error::StoreError;
use crate::schema::{DatasetSchema, VariableSchema};

/// The name of the schema document at the store root.
pub const DATASET_METADATA: &str = "dataset.json";

/// The directory under a variable that holds its chunk files.
const CHUNKS_DIR: &str = "c";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A chunked dataset store on the filesystem.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    schema: DatasetSchema,
}

impl Store {
    /// Create a new, empty store at `root` holding `schema`.
    ///
    /// # Errors
    /// Returns [`StoreError::AlreadyExists`] if `root` already holds any
    /// data (no bytes are written in that case), or an error if the schema
    /// is invalid or the directory cannot be created.
    pub fn create(root: impl AsRef<Path>, schema: DatasetSchema) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        schema.validate()?;
        if root.exists() {
            let occupied = root.is_file() || fs::read_dir(&root)?.next().is_some();
            if occupied {
                return Err(StoreError::AlreadyExists(root));
            }
        }
        fs::create_dir_all(&root)?;
        let store = Self { root, schema };
        store.write_document(DATASET_METADATA, &store.schema)?;
        Ok(store)
    }

    /// Open an existing store at `root`.
    ///
    /// Opening never requires a consolidated manifest; this reads the schema
    /// document directly.
    ///
    /// # Errors
    /// Returns [`StoreError::StoreNotFound`] if `root` does not hold a
    /// store, or an error if the schema document is unreadable or invalid.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let metadata = root.join(DATASET_METADATA);
        if !metadata.is_file() {
            return Err(StoreError::StoreNotFound(root));
        }
        let schema: DatasetSchema = serde_json::from_slice(&fs::read(metadata)?)?;
        schema.validate()?;
        Ok(Self { root, schema })
    }

    pub(crate) fn from_parts(root: PathBuf, schema: DatasetSchema) -> Self {
        Self { root, schema }
    }

    /// The root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The dataset schema.
    #[must_use]
    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    /// Look up `variable` in the schema.
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownVariable`] if absent.
    pub fn variable(&self, variable: &str) -> Result<&VariableSchema, StoreError> {
        self.schema
            .variable(variable)
            .ok_or_else(|| StoreError::UnknownVariable(variable.to_string()))
    }

    /// The chunk grid of `variable`.
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownVariable`] if absent.
    ///
    /// # Panics
    /// Panics if the schema was mutated past validation (variable dimensions
    /// must be declared).
    pub fn grid(&self, variable: &str) -> Result<ChunkGrid, StoreError> {
        let var = self.variable(variable)?;
        let shape = self
            .schema
            .variable_shape(var)
            .expect("validated schema declares every variable dimension");
        Ok(ChunkGrid::new(
            var.name.clone(),
            shape,
            var.chunk_shape.clone(),
        ))
    }

    fn chunk_path(&self, variable: &str, key: &[u64]) -> PathBuf {
        let mut path = self.root.join(variable).join(CHUNKS_DIR);
        for index in key {
            path.push(index.to_string());
        }
        path
    }

    /// The little-endian fill byte pattern for one element of `variable`.
    fn fill_element(&self, var: &VariableSchema) -> Result<Vec<u8>, StoreError> {
        Ok(var.fill_value.to_le_bytes(var.data_type)?)
    }

    /// Read the chunk of `variable` at `key`.
    ///
    /// Returns the exact sub-array covering the chunk's bounded index range
    /// as C-order little-endian bytes. A chunk never written returns the
    /// fill value.
    ///
    /// # Errors
    /// Returns [`StoreError::ChunkOutOfRange`] if `key` is outside the chunk
    /// grid, [`StoreError::ShapeMismatch`] if the stored chunk has the wrong
    /// length (a corrupt store), or an I/O error.
    pub fn read_chunk(&self, variable: &str, key: &[u64]) -> Result<Vec<u8>, StoreError> {
        let var = self.variable(variable)?;
        let region = self.grid(variable)?.chunk_region_bounded(key)?;
        let expected = region.num_elements_usize() * var.data_type.size_in_bytes();
        let path = self.chunk_path(variable, key);
        match fs::read(&path) {
            Ok(bytes) => {
                if bytes.len() == expected {
                    Ok(bytes)
                } else {
                    Err(StoreError::ShapeMismatch {
                        variable: variable.to_string(),
                        key: key.to_vec(),
                        expected,
                        got: bytes.len(),
                    })
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(self.fill_element(var)?.repeat(region.num_elements_usize()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write (or overwrite) the chunk of `variable` at `key`.
    ///
    /// `bytes` must hold exactly the bounded chunk region in C-order
    /// little-endian bytes; a shorter final chunk along a dimension is the
    /// only accepted deviation from the declared chunk shape. The write is
    /// atomic (temporary file + rename).
    ///
    /// # Errors
    /// Returns [`StoreError::ChunkOutOfRange`], [`StoreError::ShapeMismatch`]
    /// or an I/O error.
    pub fn write_chunk(&self, variable: &str, key: &[u64], bytes: &[u8]) -> Result<(), StoreError> {
        let var = self.variable(variable)?;
        let region = self.grid(variable)?.chunk_region_bounded(key)?;
        let expected = region.num_elements_usize() * var.data_type.size_in_bytes();
        if bytes.len() != expected {
            return Err(StoreError::ShapeMismatch {
                variable: variable.to_string(),
                key: key.to_vec(),
                expected,
                got: bytes.len(),
            });
        }
        let path = self.chunk_path(variable, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.write_atomic(&path, bytes)
    }

    /// Write `bytes` to `path` via a dot-temporary in the same directory.
    pub(crate) fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("chunk");
        let temp = path.with_file_name(format!(
            ".{file_name}.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp, bytes)?;
        match fs::rename(&temp, path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&temp);
                Err(e.into())
            }
        }
    }

    /// Write a JSON document at `name` under the store root, atomically.
    pub(crate) fn write_document<T: serde::Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let mut bytes = serde_json::to_vec_pretty(value)?;
        bytes.push(b'\n');
        self.write_atomic(&self.root.join(name), &bytes)
    }

    /// Read the chunk of `variable` at `key` into an [`ndarray::ArrayD`].
    ///
    /// # Errors
    /// Returns [`StoreError::ElementMismatch`] if `size_of::<T>()` does not
    /// match the variable's data type, or any [`Store::read_chunk`] error.
    ///
    /// # Panics
    /// Panics if the chunk byte length disagrees with its region shape,
    /// which [`Store::read_chunk`] rules out.
    pub fn read_chunk_ndarray<T: bytemuck::Pod>(
        &self,
        variable: &str,
        key: &[u64],
    ) -> Result<ndarray::ArrayD<T>, StoreError> {
        let var = self.variable(variable)?;
        if std::mem::size_of::<T>() != var.data_type.size_in_bytes() {
            return Err(StoreError::ElementMismatch {
                variable: variable.to_string(),
                data_type: var.data_type,
                got: std::mem::size_of::<T>(),
            });
        }
        let region = self.grid(variable)?.chunk_region_bounded(key)?;
        let bytes = self.read_chunk(variable, key)?;
        let elements: Vec<T> = bytemuck::pod_collect_to_vec(&bytes);
        let shape: Vec<usize> = region.shape().iter().map(|&l| l as usize).collect();
        Ok(ndarray::ArrayD::from_shape_vec(shape, elements)
            .expect("chunk length matches its region shape"))
    }

    /// Write the chunk of `variable` at `key` from an [`ndarray::ArrayD`].
    ///
    /// The array shape must equal the bounded chunk region shape.
    ///
    /// # Errors
    /// Returns [`StoreError::ElementMismatch`] on element type mismatch,
    /// [`StoreError::ShapeMismatch`] on shape mismatch, or any
    /// [`Store::write_chunk`] error.
    pub fn write_chunk_ndarray<T: bytemuck::Pod>(
        &self,
        variable: &str,
        key: &[u64],
        array: &ndarray::ArrayD<T>,
    ) -> Result<(), StoreError> {
        let var = self.variable(variable)?;
        if std::mem::size_of::<T>() != var.data_type.size_in_bytes() {
            return Err(StoreError::ElementMismatch {
                variable: variable.to_string(),
                data_type: var.data_type,
                got: std::mem::size_of::<T>(),
            });
        }
        let contiguous = array.as_standard_layout();
        let bytes: &[u8] = bytemuck::cast_slice(
            contiguous
                .as_slice()
                .expect("standard layout arrays are contiguous"),
        );
        self.write_chunk(variable, key, bytes)
    }

    /// The sorted list of populated chunk keys of `variable`.
    ///
    /// Temporary files from in-flight writes are ignored.
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownVariable`] or an I/O error.
    pub fn list_chunks(&self, variable: &str) -> Result<Vec<Vec<u64>>, StoreError> {
        let var = self.variable(variable)?;
        let dims = var.dimensions.len();
        let chunks_root = self.root.join(variable).join(CHUNKS_DIR);
        let mut keys = Vec::new();
        if !chunks_root.is_dir() {
            return Ok(keys);
        }
        for entry in WalkDir::new(&chunks_root).min_depth(dims).max_depth(dims) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&chunks_root)
                .expect("walked entries live under the chunks root");
            let key: Option<Vec<u64>> = relative
                .components()
                .map(|c| c.as_os_str().to_str().and_then(|s| s.parse::<u64>().ok()))
                .collect();
            if let Some(key) = key {
                keys.push(key);
            }
        }
        keys.sort_unstable();
        Ok(keys)
    }

    /// Remove the store from disk entirely.
    ///
    /// # Errors
    /// Returns an I/O error if removal fails.
    pub fn erase(&self) -> Result<(), StoreError> {
        fs::remove_dir_all(&self.root)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attributes, DataType, Dimension, FillValue, VariableSchema};

    fn schema() -> DatasetSchema {
        DatasetSchema {
            dimensions: vec![
                Dimension {
                    name: "time".to_string(),
                    size: 5,
                },
                Dimension {
                    name: "x".to_string(),
                    size: 3,
                },
            ],
            variables: vec![VariableSchema {
                name: "tas".to_string(),
                dimensions: vec!["time".to_string(), "x".to_string()],
                data_type: DataType::Float32,
                chunk_shape: vec![2, 2],
                fill_value: FillValue::from(-9999.0_f32),
                attributes: Attributes::new(),
            }],
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn open_missing_store_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            Store::open(dir.path().join("absent")),
            Err(StoreError::StoreNotFound(_))
        ));
    }

    #[test]
    fn create_refuses_occupied_location() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("ds");
        Store::create(&root, schema()).unwrap();
        assert!(matches!(
            Store::create(&root, schema()),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn create_accepts_an_empty_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        Store::create(dir.path(), schema()).unwrap();
    }

    #[test]
    fn chunk_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::create(dir.path().join("ds"), schema()).unwrap();
        let block =
            ndarray::ArrayD::from_shape_vec(vec![2, 2], vec![1.0_f32, 2.0, 3.0, 4.0]).unwrap();
        store.write_chunk_ndarray("tas", &[0, 0], &block).unwrap();
        let back: ndarray::ArrayD<f32> = store.read_chunk_ndarray("tas", &[0, 0]).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn unwritten_chunk_reads_as_fill() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::create(dir.path().join("ds"), schema()).unwrap();
        let back: ndarray::ArrayD<f32> = store.read_chunk_ndarray("tas", &[0, 0]).unwrap();
        assert!(back.iter().all(|&v| v == -9999.0));
    }

    #[test]
    fn final_chunk_is_short() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::create(dir.path().join("ds"), schema()).unwrap();
        // time 4..5, x 2..3: a 1x1 block.
        let block = ndarray::ArrayD::from_shape_vec(vec![1, 1], vec![7.0_f32]).unwrap();
        store.write_chunk_ndarray("tas", &[2, 1], &block).unwrap();
        let back: ndarray::ArrayD<f32> = store.read_chunk_ndarray("tas", &[2, 1]).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn wrong_shape_write_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::create(dir.path().join("ds"), schema()).unwrap();
        let bytes = vec![0_u8; 4]; // one f32, chunk needs four
        assert!(matches!(
            store.write_chunk("tas", &[0, 0], &bytes),
            Err(StoreError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn out_of_range_key_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::create(dir.path().join("ds"), schema()).unwrap();
        assert!(matches!(
            store.read_chunk("tas", &[9, 0]),
            Err(StoreError::ChunkOutOfRange { .. })
        ));
    }

    #[test]
    fn element_type_is_checked() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::create(dir.path().join("ds"), schema()).unwrap();
        assert!(matches!(
            store.read_chunk_ndarray::<f64>("tas", &[0, 0]),
            Err(StoreError::ElementMismatch { .. })
        ));
    }

    #[test]
    fn list_chunks_is_sorted_and_skips_temporaries() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::create(dir.path().join("ds"), schema()).unwrap();
        for key in [[2_u64, 1], [0, 0], [1, 1]] {
            let region = store.grid("tas").unwrap().chunk_region_bounded(&key).unwrap();
            let bytes = vec![0_u8; region.num_elements_usize() * 4];
            store.write_chunk("tas", &key, &bytes).unwrap();
        }
        fs::write(dir.path().join("ds/tas/c/0/.1.999.0.tmp"), b"junk").unwrap();
        assert_eq!(
            store.list_chunks("tas").unwrap(),
            vec![vec![0, 0], vec![1, 1], vec![2, 1]]
        );
    }
}
