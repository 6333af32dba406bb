//! Staging store lifecycle.
//!
//! Multi-stage plans write their intermediate layouts into staging stores. A
//! staging store moves strictly through created, populated, consumed and
//! deleted; deletion is only legal after the downstream stage has consumed
//! the data, so an out-of-order delete is caught as a bug instead of data
//! loss. When a run fails, staging stores are abandoned in place for
//! inspection rather than cleaned up.

use crate::error::{RechunkError, StagingError};
use crate::schema::DatasetSchema;
use crate::store::Store;

/// Lifecycle state of a staging store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingState {
    /// The store exists on disk but holds no chunks yet.
    Created,
    /// A stage has finished writing into the store.
    Populated,
    /// The downstream stage has finished reading from the store.
    Consumed,
    /// The store has been removed from disk.
    Deleted,
}

impl StagingState {
    fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Populated => "populated",
            Self::Consumed => "consumed",
            Self::Deleted => "deleted",
        }
    }
}

/// A store holding the output of one intermediate stage.
#[derive(Debug)]
pub struct StagingStore {
    store: Store,
    state: StagingState,
}

impl StagingStore {
    /// Create a staging store at `root` in the `Created` state.
    ///
    /// # Errors
    /// Returns any [`Store::create`] error, including `AlreadyExists` if a
    /// previous run left data at `root`.
    pub fn create(root: impl AsRef<std::path::Path>, schema: DatasetSchema) -> Result<Self, RechunkError> {
        Ok(Self {
            store: Store::create(root, schema)?,
            state: StagingState::Created,
        })
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StagingState {
        self.state
    }

    fn transition(&mut self, from: StagingState, to: StagingState) -> Result<(), StagingError> {
        if self.state == from {
            self.state = to;
            Ok(())
        } else {
            Err(StagingError::InvalidTransition {
                path: self.store.root().to_path_buf(),
                from: self.state.name(),
                to: to.name(),
            })
        }
    }

    /// Record that the producing stage has finished writing.
    ///
    /// # Errors
    /// Returns [`StagingError::InvalidTransition`] unless currently `Created`.
    pub fn mark_populated(&mut self) -> Result<(), StagingError> {
        self.transition(StagingState::Created, StagingState::Populated)
    }

    /// Record that the consuming stage has finished reading.
    ///
    /// # Errors
    /// Returns [`StagingError::InvalidTransition`] unless currently
    /// `Populated`.
    pub fn mark_consumed(&mut self) -> Result<(), StagingError> {
        self.transition(StagingState::Populated, StagingState::Consumed)
    }

    /// Remove the store from disk. Legal only once consumed.
    ///
    /// # Errors
    /// Returns [`StagingError::InvalidTransition`] unless currently
    /// `Consumed`, or an I/O error if removal fails.
    pub fn delete(mut self) -> Result<(), RechunkError> {
        self.transition(StagingState::Consumed, StagingState::Deleted)?;
        self.store.erase()?;
        Ok(())
    }

    /// Leave the store on disk and log where it was left. Used when a run
    /// fails partway, so the partial state stays inspectable.
    pub fn abandon(self) {
        if self.state != StagingState::Deleted {
            log::warn!(
                "leaving {} staging store in place at {}",
                self.state.name(),
                self.store.root().display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attributes, DataType, Dimension, FillValue, VariableSchema};

    fn schema() -> DatasetSchema {
        DatasetSchema {
            dimensions: vec![Dimension {
                name: "x".to_string(),
                size: 2,
            }],
            variables: vec![VariableSchema {
                name: "v".to_string(),
                dimensions: vec!["x".to_string()],
                data_type: DataType::UInt8,
                chunk_shape: vec![1],
                fill_value: FillValue::from(0_u64),
                attributes: Attributes::new(),
            }],
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn full_lifecycle_removes_the_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("v.stage0");
        let mut staging = StagingStore::create(&root, schema()).unwrap();
        staging.mark_populated().unwrap();
        staging.mark_consumed().unwrap();
        staging.delete().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn delete_before_consumption_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("v.stage0");
        let mut staging = StagingStore::create(&root, schema()).unwrap();
        staging.mark_populated().unwrap();
        let err = staging.delete().unwrap_err();
        assert!(matches!(
            err,
            RechunkError::Staging(StagingError::InvalidTransition { from: "populated", .. })
        ));
        assert!(root.exists());
    }

    #[test]
    fn skipping_population_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut staging = StagingStore::create(dir.path().join("s"), schema()).unwrap();
        assert!(staging.mark_consumed().is_err());
    }

    #[test]
    fn abandon_leaves_the_store_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("v.stage0");
        let staging = StagingStore::create(&root, schema()).unwrap();
        staging.abandon();
        assert!(root.exists());
    }
}
