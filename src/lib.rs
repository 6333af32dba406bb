//! Staged rechunking for chunked multidimensional array datasets.
//!
//! `rechunk` transforms the physical chunk layout of an on-disk dataset
//! between two rectangular grid layouts under a per-task memory budget. When
//! the budget cannot hold a source chunk and a target chunk side by side,
//! the run is split into stages through intermediate staging stores, each
//! stage a streaming chunk reshuffle that never materialises a whole array.
//!
//! A dataset lives in a self-describing directory store:
//!
//! ```text
//! <root>/dataset.json              dimensions, variables, attributes
//! <root>/<variable>/c/<i>/<j>/...  one file per chunk, C-order little-endian
//! <root>/manifest.json             consolidated manifest, written on finalisation
//! ```
//!
//! The pieces compose bottom-up:
//!
//! - [`region`] and [`chunk_grid`] — index-space geometry.
//! - [`schema`] and [`store`] — the data model and the store adapter.
//! - [`plan`] — stage sequences under a memory budget.
//! - [`executor`] — parallel execution of one stage.
//! - [`staging`] and [`consolidate`] — intermediate-store lifecycle and
//!   manifest consolidation.
//! - [`rechunk`](crate::rechunk) — whole-dataset runs, driven by the
//!   `rechunk` binary or embedded through [`rechunk::rechunk`].
//!
//! Progress is reported through an injected [`ProgressListener`]; the
//! library renders nothing itself.

#![warn(missing_docs)]

pub mod chunk_grid;
pub mod consolidate;
pub mod error;
pub mod executor;
pub mod plan;
pub mod progress;
pub mod rechunk;
pub mod region;
pub mod schema;
pub mod staging;
pub mod store;

pub use crate::consolidate::{consolidate_metadata, Manifest, CONSOLIDATED_METADATA};
pub use crate::error::{PlanError, RechunkError, SchemaError, StagingError, StoreError};
pub use crate::executor::execute_stage;
pub use crate::plan::{plan_stages, Stage, StagePlan};
pub use crate::progress::{NullListener, ProgressListener};
pub use crate::rechunk::{rechunk, RechunkRequest, RechunkSummary, VariableReport};
pub use crate::region::Region;
pub use crate::schema::{
    Attributes, DataType, DatasetSchema, Dimension, FillValue, VariableSchema,
};
pub use crate::staging::{StagingState, StagingStore};
pub use crate::store::{Store, DATASET_METADATA};
