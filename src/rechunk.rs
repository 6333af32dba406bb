//! Whole-dataset rechunk runs.
//!
//! A run opens a source store, derives the target schema (dropping excluded
//! variables, rewriting chunk shapes, prepending provenance history), then
//! plans and executes the stage sequence of every variable and consolidates
//! the target metadata. Variables without a requested chunk shape — in
//! practice coordinates and small secondary variables — are written as a
//! single chunk.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::consolidate::{consolidate_metadata, Manifest};
use crate::error::RechunkError;
use crate::executor::execute_stage;
use crate::plan::plan_stages;
use crate::progress::ProgressListener;
use crate::schema::{DatasetSchema, VariableSchema};
use crate::staging::StagingStore;
use crate::store::Store;

/// Everything a rechunk run needs to know.
#[derive(Debug, Clone)]
pub struct RechunkRequest {
    /// Root of the source store.
    pub source: PathBuf,
    /// Root of the target store; must not already hold data.
    pub target: PathBuf,
    /// Directory under which staging stores are created, one per variable
    /// and intermediate stage at `<staging_root>/<variable>.stage<N>`.
    pub staging_root: PathBuf,
    /// Requested chunk shape per variable. Variables absent from the map are
    /// stored as one single chunk; lengths are clamped to `1..=size`.
    pub target_chunks: BTreeMap<String, Vec<u64>>,
    /// Variables to omit from the target. Names that do not exist in the
    /// source are ignored.
    pub drop_variables: Vec<String>,
    /// Memory budget in bytes for one in-flight chunk task.
    pub max_memory: u64,
    /// Number of destination chunks in flight at once. The run's memory
    /// high-water mark is `concurrent_chunks * max_memory`.
    pub concurrent_chunks: usize,
    /// Provenance line to prepend to the target's `history` attribute.
    pub history: Option<String>,
}

/// Per-variable outcome of a run.
#[derive(Debug, Clone)]
pub struct VariableReport {
    /// The variable name.
    pub name: String,
    /// The number of stages its plan needed.
    pub num_stages: usize,
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct RechunkSummary {
    /// One report per variable written to the target, in schema order.
    pub variables: Vec<VariableReport>,
    /// Variables dropped from the source.
    pub dropped: Vec<String>,
    /// The consolidated manifest of the target store.
    pub manifest: Manifest,
}

/// Run a full rechunk.
///
/// On failure, staging stores already created are left on disk and their
/// paths logged; the partially written target is left in place as well.
///
/// # Errors
/// Returns the first store, planning or staging error encountered.
pub fn rechunk(
    request: &RechunkRequest,
    listener: &dyn ProgressListener,
) -> Result<RechunkSummary, RechunkError> {
    let source = Store::open(&request.source)?;
    let (target_schema, dropped) = derive_target_schema(source.schema(), request);
    let target = Store::create(&request.target, target_schema)?;

    let mut variables = Vec::new();
    let target_variables = target.schema().variables.clone();
    for var in &target_variables {
        let mut staging = Vec::new();
        let result = rechunk_variable(&source, &target, var, request, listener, &mut staging);
        match result {
            Ok(num_stages) => variables.push(VariableReport {
                name: var.name.clone(),
                num_stages,
            }),
            Err(e) => {
                for store in staging.drain(..) {
                    store.abandon();
                }
                return Err(e);
            }
        }
    }

    let manifest = consolidate_metadata(&target)?;
    log::info!(
        "rechunked {} variables into {}",
        variables.len(),
        target.root().display()
    );
    Ok(RechunkSummary {
        variables,
        dropped,
        manifest,
    })
}

/// Plan and execute the stage sequence of one variable. Staging stores are
/// pushed onto `staging` as created so the caller can abandon them if a
/// stage fails; on success each is consumed and deleted as soon as its
/// downstream stage completes.
fn rechunk_variable(
    source: &Store,
    target: &Store,
    var: &VariableSchema,
    request: &RechunkRequest,
    listener: &dyn ProgressListener,
    staging: &mut Vec<StagingStore>,
) -> Result<usize, RechunkError> {
    let array_shape = source
        .grid(&var.name)?
        .array_shape()
        .to_vec();
    let source_chunks = source.variable(&var.name)?.chunk_shape.clone();
    let plan = plan_stages(
        &var.name,
        &source_chunks,
        &var.chunk_shape,
        &array_shape,
        var.data_type.size_in_bytes(),
        request.max_memory,
    )?;
    let num_stages = plan.num_stages();
    log::info!(
        "variable {}: {:?} -> {:?} in {} stage(s)",
        var.name,
        source_chunks,
        var.chunk_shape,
        num_stages
    );

    for (i, stage) in plan.stages().enumerate() {
        let last = i + 1 == num_stages;
        if !last {
            let root = request.staging_root.join(format!("{}.stage{i}", var.name));
            let schema = stage_schema(source.schema(), var, &stage.write_shape);
            staging.push(StagingStore::create(root, schema)?);
        }
        {
            let reader: &Store = if i == 0 { source } else { staging[0].store() };
            let writer: &Store = if last {
                target
            } else {
                staging.last().map(StagingStore::store).unwrap_or(target)
            };
            execute_stage(
                reader,
                writer,
                &var.name,
                i,
                num_stages,
                request.concurrent_chunks,
                listener,
            )?;
        }
        if !last {
            if let Some(written) = staging.last_mut() {
                written.mark_populated()?;
            }
        }
        if i > 0 {
            let mut consumed = staging.remove(0);
            consumed.mark_consumed()?;
            consumed.delete()?;
        }
    }
    Ok(num_stages)
}

/// A single-variable schema for a staging store, with the intermediate
/// chunk shape.
fn stage_schema(dataset: &DatasetSchema, var: &VariableSchema, chunk_shape: &[u64]) -> DatasetSchema {
    DatasetSchema {
        dimensions: dataset
            .dimensions
            .iter()
            .filter(|d| var.dimensions.contains(&d.name))
            .cloned()
            .collect(),
        variables: vec![VariableSchema {
            chunk_shape: chunk_shape.to_vec(),
            ..var.clone()
        }],
        attributes: crate::schema::Attributes::new(),
    }
}

/// Derive the target schema: drop excluded variables, rewrite chunk shapes,
/// prepend the history line. Returns the schema and the names actually
/// dropped.
fn derive_target_schema(
    source: &DatasetSchema,
    request: &RechunkRequest,
) -> (DatasetSchema, Vec<String>) {
    let mut schema = source.clone();
    let dropped: Vec<String> = schema
        .variables
        .iter()
        .filter(|v| request.drop_variables.contains(&v.name))
        .map(|v| v.name.clone())
        .collect();
    schema
        .variables
        .retain(|v| !request.drop_variables.contains(&v.name));

    for var in &mut schema.variables {
        let full_shape: Vec<u64> = var
            .dimensions
            .iter()
            .map(|name| schema.dimensions.iter().find(|d| &d.name == name))
            .map(|d| d.map_or(1, |d| d.size.max(1)))
            .collect();
        var.chunk_shape = match request.target_chunks.get(&var.name) {
            Some(requested) => requested
                .iter()
                .zip(&full_shape)
                .map(|(&len, &size)| len.clamp(1, size))
                .collect(),
            // Single chunk for coordinates and unlisted variables.
            None => full_shape,
        };
    }

    if let Some(line) = &request.history {
        let prior = schema
            .attributes
            .get("history")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let value = if prior.is_empty() {
            line.clone()
        } else {
            format!("{line}\n{prior}")
        };
        schema
            .attributes
            .insert("history".to_string(), serde_json::Value::String(value));
    }

    (schema, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attributes, DataType, Dimension, FillValue};

    fn source_schema() -> DatasetSchema {
        DatasetSchema {
            dimensions: vec![
                Dimension {
                    name: "time".to_string(),
                    size: 8,
                },
                Dimension {
                    name: "x".to_string(),
                    size: 4,
                },
            ],
            variables: vec![
                VariableSchema {
                    name: "tas".to_string(),
                    dimensions: vec!["time".to_string(), "x".to_string()],
                    data_type: DataType::Float32,
                    chunk_shape: vec![8, 1],
                    fill_value: FillValue::from(f64::NAN),
                    attributes: Attributes::new(),
                },
                VariableSchema {
                    name: "height".to_string(),
                    dimensions: vec!["x".to_string()],
                    data_type: DataType::Float64,
                    chunk_shape: vec![4],
                    fill_value: FillValue::from(0.0),
                    attributes: Attributes::new(),
                },
            ],
            attributes: Attributes::new(),
        }
    }

    fn request(base: &std::path::Path) -> RechunkRequest {
        RechunkRequest {
            source: base.join("src"),
            target: base.join("dst"),
            staging_root: base.join("staging"),
            target_chunks: BTreeMap::from([("tas".to_string(), vec![1, 4])]),
            drop_variables: vec!["height".to_string(), "lat_bnds".to_string()],
            max_memory: 1 << 20,
            concurrent_chunks: 2,
            history: Some("rechunk: tas to (1, 4)".to_string()),
        }
    }

    #[test]
    fn derive_drops_rechunks_and_prepends_history() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut source = source_schema();
        source.attributes.insert(
            "history".to_string(),
            serde_json::Value::String("created by simulation".to_string()),
        );
        let (schema, dropped) = derive_target_schema(&source, &request(dir.path()));
        // Missing drop names are ignored.
        assert_eq!(dropped, vec!["height".to_string()]);
        assert_eq!(schema.variables.len(), 1);
        assert_eq!(schema.variables[0].chunk_shape, vec![1, 4]);
        assert_eq!(
            schema.attributes["history"],
            "rechunk: tas to (1, 4)\ncreated by simulation"
        );
    }

    #[test]
    fn unlisted_variables_become_a_single_chunk() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut req = request(dir.path());
        req.drop_variables.clear();
        let (schema, _) = derive_target_schema(&source_schema(), &req);
        let height = schema.variables.iter().find(|v| v.name == "height").unwrap();
        assert_eq!(height.chunk_shape, vec![4]);
    }

    #[test]
    fn requested_chunk_lengths_are_clamped() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut req = request(dir.path());
        req.target_chunks
            .insert("tas".to_string(), vec![0, 99]);
        let (schema, _) = derive_target_schema(&source_schema(), &req);
        assert_eq!(schema.variables[0].chunk_shape, vec![1, 4]);
    }

    #[test]
    fn occupied_target_aborts_before_writing() {
        let dir = tempfile::TempDir::new().unwrap();
        let req = request(dir.path());
        Store::create(&req.source, source_schema()).unwrap();
        std::fs::create_dir_all(&req.target).unwrap();
        std::fs::write(req.target.join("keep.txt"), b"precious").unwrap();

        let err = rechunk(&req, &crate::progress::NullListener).unwrap_err();
        assert!(matches!(
            err,
            RechunkError::Store(crate::error::StoreError::AlreadyExists(_))
        ));
        assert_eq!(std::fs::read_dir(&req.target).unwrap().count(), 1);
    }
}
