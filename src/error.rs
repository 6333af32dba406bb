//! Error taxonomy of the rechunking engine.
//!
//! All errors abort a run; nothing in this crate retries. Partial state left
//! behind by a failed run is always inspectable (see
//! [`staging`](crate::staging)).

use std::path::PathBuf;

use thiserror::Error;

use crate::region::RegionError;
use crate::schema::DataType;

/// An error raised by the chunked store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The location does not exist or is not a valid chunked store.
    #[error("no chunked store found at {0}")]
    StoreNotFound(PathBuf),
    /// The target location already holds data. Refusing to overwrite it is a
    /// deliberate safety check and is not recoverable automatically.
    #[error("store location already exists: {0}")]
    AlreadyExists(PathBuf),
    /// A chunk key lies outside the chunk grid of a variable. This indicates
    /// a planning bug, not a data problem.
    #[error("chunk key {key:?} is outside the {grid_shape:?} chunk grid of variable {variable}")]
    ChunkOutOfRange {
        /// The variable being addressed.
        variable: String,
        /// The offending chunk key.
        key: Vec<u64>,
        /// The shape of the variable's chunk grid.
        grid_shape: Vec<u64>,
    },
    /// A chunk block does not match the declared chunk shape truncated at the
    /// dataset boundary (the only sanctioned shape deviation is a shorter
    /// final chunk along a dimension).
    #[error(
        "chunk {key:?} of variable {variable} expects {expected} bytes, block holds {got} bytes"
    )]
    ShapeMismatch {
        /// The variable being written.
        variable: String,
        /// The chunk key being written.
        key: Vec<u64>,
        /// The byte length implied by the bounded chunk shape.
        expected: usize,
        /// The byte length supplied.
        got: usize,
    },
    /// The element type of a typed read/write does not match the variable's
    /// declared data type.
    #[error("element size {got} bytes does not match data type {data_type} of variable {variable}")]
    ElementMismatch {
        /// The variable being accessed.
        variable: String,
        /// The variable's declared data type.
        data_type: DataType,
        /// The element size supplied by the caller.
        got: usize,
    },
    /// The dataset has no variable of the given name.
    #[error("no variable named {0} in dataset")]
    UnknownVariable(String),
    /// The dataset schema is invalid.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Region arithmetic failed; indicates a planning bug.
    #[error(transparent)]
    Region(#[from] RegionError),
    /// An underlying filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A metadata document could not be encoded or decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// An error in a dataset schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A variable references a dimension the dataset does not declare.
    #[error("variable {variable} references undeclared dimension {dimension}")]
    UndeclaredDimension {
        /// The variable at fault.
        variable: String,
        /// The missing dimension name.
        dimension: String,
    },
    /// A variable's chunk shape does not have one entry per dimension.
    #[error("variable {variable} has {got} chunk lengths for {expected} dimensions")]
    ChunkShapeLength {
        /// The variable at fault.
        variable: String,
        /// The number of dimensions of the variable.
        expected: usize,
        /// The number of chunk lengths supplied.
        got: usize,
    },
    /// A chunk length of zero is meaningless.
    #[error("variable {variable} declares a zero chunk length")]
    ZeroChunkLength {
        /// The variable at fault.
        variable: String,
    },
    /// A variable must have at least one dimension.
    #[error("variable {variable} has no dimensions")]
    ZeroDimensional {
        /// The variable at fault.
        variable: String,
    },
    /// Two variables (or dimensions) share a name.
    #[error("duplicate declaration of {0}")]
    Duplicate(String),
    /// A fill value cannot be represented in the variable's data type.
    #[error("fill value {value} is not representable as {data_type}")]
    InvalidFillValue {
        /// The fill value as JSON.
        value: serde_json::Value,
        /// The target data type.
        data_type: DataType,
    },
}

/// An error raised by the layout planner.
#[derive(Debug, Error)]
pub enum PlanError {
    /// No stage sequence exists under the memory budget. The budget must be
    /// raised or the target chunk shape coarsened; this is reported, never
    /// retried.
    #[error(
        "memory budget of {budget} bytes cannot hold the smallest stage working set \
         ({required} bytes) for variable {variable}"
    )]
    BudgetTooSmall {
        /// The variable being planned.
        variable: String,
        /// The budget supplied.
        budget: u64,
        /// The smallest working set any stage sequence would need.
        required: u64,
    },
    /// Source and target chunk shapes have different dimensionality.
    #[error(transparent)]
    Region(#[from] RegionError),
}

/// An error in the staging-store lifecycle.
#[derive(Debug, Error)]
pub enum StagingError {
    /// A lifecycle transition was attempted out of order, e.g. deleting a
    /// staging store that has not been consumed.
    #[error("staging store {path} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The staging store location.
        path: PathBuf,
        /// The current state.
        from: &'static str,
        /// The requested state.
        to: &'static str,
    },
}

/// Any error a rechunk run can surface.
#[derive(Debug, Error)]
pub enum RechunkError {
    /// A store adapter error.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A layout planning error.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// A staging lifecycle error.
    #[error(transparent)]
    Staging(#[from] StagingError),
}
