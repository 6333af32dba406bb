//! Stage execution: streaming chunk reshuffling between two stores.
//!
//! A stage copies one variable from a source store into a destination store
//! whose chunk layout differs. Work is partitioned by destination chunk:
//! each destination chunk is assembled in a private buffer from every source
//! chunk it intersects, then written exactly once. Destination chunks are
//! independent, so they run in parallel under a concurrency limit; the
//! memory high-water mark is `limit` stage working sets.

use rayon::prelude::*;
use rayon_iter_concurrent_limit::iter_concurrent_limit;

use crate::error::StoreError;
use crate::progress::ProgressListener;
use crate::region::Region;
use crate::store::Store;

/// Copy `variable` from `source` into `dest`, reshaping chunks.
///
/// Both stores must declare the variable with the same array shape and data
/// type; only the chunk shapes differ. `stage` and `num_stages` are passed
/// through to the listener. At most `concurrent_chunks` destination chunks
/// are in flight at once (clamped to at least one).
///
/// # Errors
/// Returns the first error any worker hits; destination chunks already
/// renamed into place remain on disk.
pub fn execute_stage(
    source: &Store,
    dest: &Store,
    variable: &str,
    stage: usize,
    num_stages: usize,
    concurrent_chunks: usize,
    listener: &dyn ProgressListener,
) -> Result<(), StoreError> {
    let source_grid = source.grid(variable)?;
    let dest_grid = dest.grid(variable)?;
    debug_assert_eq!(source_grid.array_shape(), dest_grid.array_shape());

    let var = dest.variable(variable)?;
    let element_size = var.data_type.size_in_bytes();
    let fill = var.fill_value.to_le_bytes(var.data_type)?;

    let dest_keys: Vec<Vec<u64>> = Region::with_shape(dest_grid.grid_shape()).indices().collect();
    log::debug!(
        "stage {stage}: assembling {} chunks of {variable} from {:?} into {:?}",
        dest_keys.len(),
        source_grid.chunk_shape(),
        dest_grid.chunk_shape()
    );
    listener.stage_started(variable, stage, num_stages, dest_keys.len() as u64);

    let assemble_chunk = |key: Vec<u64>| -> Result<(), StoreError> {
        let dest_region = dest_grid.chunk_region_bounded(&key)?;
        let mut buffer = fill.repeat(dest_region.num_elements_usize());

        for source_key in source_grid.chunks_in_region(&dest_region)?.indices() {
            let source_region = source_grid.chunk_region_bounded(&source_key)?;
            let overlap = dest_region.overlap(&source_region)?;
            if overlap.is_empty() {
                continue;
            }
            let source_bytes = source.read_chunk(variable, &source_key)?;
            let in_source = overlap.relative_to(source_region.start())?;
            let in_dest = overlap.relative_to(dest_region.start())?;
            for ((src_start, length), (dst_start, _)) in in_source
                .linearised_rows(source_region.shape())?
                .zip(in_dest.linearised_rows(dest_region.shape())?)
            {
                let src = src_start as usize * element_size;
                let dst = dst_start as usize * element_size;
                let len = length as usize * element_size;
                buffer[dst..dst + len].copy_from_slice(&source_bytes[src..src + len]);
            }
        }

        dest.write_chunk(variable, &key, &buffer)?;
        listener.chunk_written(variable, stage);
        Ok(())
    };

    let limit = concurrent_chunks.max(1);
    iter_concurrent_limit!(limit, dest_keys, try_for_each, assemble_chunk)?;

    listener.stage_finished(variable, stage);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::progress::NullListener;
    use crate::schema::{Attributes, DataType, DatasetSchema, Dimension, FillValue, VariableSchema};

    fn schema(chunk_shape: Vec<u64>) -> DatasetSchema {
        DatasetSchema {
            dimensions: vec![
                Dimension {
                    name: "y".to_string(),
                    size: 4,
                },
                Dimension {
                    name: "x".to_string(),
                    size: 4,
                },
            ],
            variables: vec![VariableSchema {
                name: "v".to_string(),
                dimensions: vec!["y".to_string(), "x".to_string()],
                data_type: DataType::Float32,
                chunk_shape,
                fill_value: FillValue::from(f64::NAN),
                attributes: Attributes::new(),
            }],
            attributes: Attributes::new(),
        }
    }

    /// Source holds columns, destination rows; every element must land at
    /// its transposed-chunking position.
    #[test]
    fn columns_to_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = Store::create(dir.path().join("src"), schema(vec![4, 1])).unwrap();
        let dest = Store::create(dir.path().join("dst"), schema(vec![1, 4])).unwrap();
        for j in 0..4_u64 {
            let column: Vec<f32> = (0..4).map(|i| (i * 4 + j) as f32).collect();
            let block = ndarray::ArrayD::from_shape_vec(vec![4, 1], column).unwrap();
            source.write_chunk_ndarray("v", &[0, j], &block).unwrap();
        }

        execute_stage(&source, &dest, "v", 0, 1, 4, &NullListener).unwrap();

        for i in 0..4_u64 {
            let row: ndarray::ArrayD<f32> = dest.read_chunk_ndarray("v", &[i, 0]).unwrap();
            let expected: Vec<f32> = (0..4).map(|j| (i * 4 + j) as f32).collect();
            assert_eq!(row.into_raw_vec_and_offset().0, expected);
        }
    }

    /// Unwritten source chunks contribute the fill value, and the stage still
    /// writes every destination chunk.
    #[test]
    fn missing_source_chunks_become_fill() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = Store::create(dir.path().join("src"), schema(vec![4, 1])).unwrap();
        let dest = Store::create(dir.path().join("dst"), schema(vec![2, 2])).unwrap();
        let column = ndarray::ArrayD::from_shape_vec(vec![4, 1], vec![1.0_f32; 4]).unwrap();
        source.write_chunk_ndarray("v", &[0, 0], &column).unwrap();

        execute_stage(&source, &dest, "v", 0, 1, 2, &NullListener).unwrap();

        let block: ndarray::ArrayD<f32> = dest.read_chunk_ndarray("v", &[0, 0]).unwrap();
        assert_eq!(block[[0, 0]], 1.0);
        assert!(block[[0, 1]].is_nan());
        assert_eq!(dest.list_chunks("v").unwrap().len(), 4);
    }

    /// Destination chunks run concurrently; the written key set must equal
    /// the full destination grid and the bounded chunk regions must tile the
    /// array with no gap and no overlap, even for misaligned chunk shapes.
    #[test]
    fn concurrent_chunks_tile_the_destination_exactly_once() {
        fn misaligned(chunk_shape: Vec<u64>) -> DatasetSchema {
            DatasetSchema {
                dimensions: vec![
                    Dimension {
                        name: "y".to_string(),
                        size: 7,
                    },
                    Dimension {
                        name: "x".to_string(),
                        size: 5,
                    },
                ],
                variables: vec![VariableSchema {
                    name: "v".to_string(),
                    dimensions: vec!["y".to_string(), "x".to_string()],
                    data_type: DataType::Float32,
                    chunk_shape,
                    fill_value: FillValue::from(0.0),
                    attributes: Attributes::new(),
                }],
                attributes: Attributes::new(),
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        let source = Store::create(dir.path().join("src"), misaligned(vec![3, 2])).unwrap();
        let dest = Store::create(dir.path().join("dst"), misaligned(vec![2, 3])).unwrap();
        let source_grid = source.grid("v").unwrap();
        for key in Region::with_shape(source_grid.grid_shape()).indices() {
            let region = source_grid.chunk_region_bounded(&key).unwrap();
            let values: Vec<f32> = region
                .indices()
                .map(|idx| (idx[0] * 5 + idx[1]) as f32)
                .collect();
            let shape: Vec<usize> = region.shape().iter().map(|&l| l as usize).collect();
            let block = ndarray::ArrayD::from_shape_vec(shape, values).unwrap();
            source.write_chunk_ndarray("v", &key, &block).unwrap();
        }

        execute_stage(&source, &dest, "v", 0, 1, 16, &NullListener).unwrap();

        let dest_grid = dest.grid("v").unwrap();
        let mut expected: Vec<Vec<u64>> =
            Region::with_shape(dest_grid.grid_shape()).indices().collect();
        expected.sort_unstable();
        assert_eq!(dest.list_chunks("v").unwrap(), expected);

        // Element-wise coverage count over the whole array.
        let mut covered = vec![0_u32; 7 * 5];
        for key in &expected {
            let region = dest_grid.chunk_region_bounded(key).unwrap();
            let block: ndarray::ArrayD<f32> = dest.read_chunk_ndarray("v", key).unwrap();
            for (offset, idx) in region.indices().enumerate() {
                let linear = crate::region::ravel_indices(&idx, &[7, 5]) as usize;
                covered[linear] += 1;
                let value = block.as_slice().unwrap()[offset];
                assert_eq!(value, linear as f32);
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    struct CountingListener {
        started: AtomicU64,
        written: AtomicU64,
        finished: AtomicU64,
    }

    impl ProgressListener for CountingListener {
        fn stage_started(&self, _variable: &str, _stage: usize, _num_stages: usize, n: u64) {
            self.started.store(n, Ordering::SeqCst);
        }
        fn chunk_written(&self, _variable: &str, _stage: usize) {
            self.written.fetch_add(1, Ordering::SeqCst);
        }
        fn stage_finished(&self, _variable: &str, _stage: usize) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn listener_sees_every_chunk_exactly_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = Store::create(dir.path().join("src"), schema(vec![2, 2])).unwrap();
        let dest = Store::create(dir.path().join("dst"), schema(vec![3, 3])).unwrap();
        let listener = CountingListener {
            started: AtomicU64::new(0),
            written: AtomicU64::new(0),
            finished: AtomicU64::new(0),
        };

        execute_stage(&source, &dest, "v", 0, 1, 8, &listener).unwrap();

        // A 4x4 array in 3x3 chunks has a 2x2 chunk grid.
        assert_eq!(listener.started.load(Ordering::SeqCst), 4);
        assert_eq!(listener.written.load(Ordering::SeqCst), 4);
        assert_eq!(listener.finished.load(Ordering::SeqCst), 1);
    }
}
