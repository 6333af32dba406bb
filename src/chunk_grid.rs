//! Regular chunk grid math.
//!
//! A [`ChunkGrid`] partitions an array of a given shape into a rectangular
//! grid of chunks of a declared shape. The final chunk along a dimension may
//! extend past the array boundary; its *bounded* region is truncated to the
//! array, and that truncated shape is the only sanctioned deviation from the
//! declared chunk shape.

use itertools::izip;

use crate::error::StoreError;
use crate::region::Region;

/// A regular chunk grid over an array shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    variable: String,
    array_shape: Vec<u64>,
    chunk_shape: Vec<u64>,
}

impl ChunkGrid {
    /// Create a chunk grid for `variable`.
    ///
    /// The caller guarantees `array_shape` and `chunk_shape` have equal
    /// length and nonzero chunk lengths (enforced by schema validation); the
    /// variable name is carried for error reporting only.
    #[must_use]
    pub fn new(variable: impl Into<String>, array_shape: Vec<u64>, chunk_shape: Vec<u64>) -> Self {
        debug_assert_eq!(array_shape.len(), chunk_shape.len());
        debug_assert!(!chunk_shape.contains(&0));
        Self {
            variable: variable.into(),
            array_shape,
            chunk_shape,
        }
    }

    /// The shape of the underlying array.
    #[must_use]
    pub fn array_shape(&self) -> &[u64] {
        &self.array_shape
    }

    /// The declared chunk shape.
    #[must_use]
    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    /// The number of chunks along each dimension.
    #[must_use]
    pub fn grid_shape(&self) -> Vec<u64> {
        izip!(&self.array_shape, &self.chunk_shape)
            .map(|(a, c)| a.div_ceil(*c))
            .collect()
    }

    /// The total number of chunks in the grid.
    #[must_use]
    pub fn num_chunks(&self) -> u64 {
        self.grid_shape().iter().product()
    }

    /// Whether `key` addresses a chunk inside the grid.
    #[must_use]
    pub fn contains_key(&self, key: &[u64]) -> bool {
        key.len() == self.array_shape.len()
            && izip!(key, self.grid_shape()).all(|(k, g)| *k < g)
    }

    /// The unbounded region of the chunk at `key` (may extend past the array
    /// boundary along the final chunk of a dimension).
    ///
    /// # Errors
    /// Returns [`StoreError::ChunkOutOfRange`] if `key` is outside the grid.
    pub fn chunk_region(&self, key: &[u64]) -> Result<Region, StoreError> {
        if !self.contains_key(key) {
            return Err(StoreError::ChunkOutOfRange {
                variable: self.variable.clone(),
                key: key.to_vec(),
                grid_shape: self.grid_shape(),
            });
        }
        let start: Vec<u64> = izip!(key, &self.chunk_shape).map(|(k, c)| k * c).collect();
        Ok(Region::new(start, self.chunk_shape.clone())?)
    }

    /// The region of the chunk at `key`, truncated at the array boundary.
    ///
    /// # Errors
    /// Returns [`StoreError::ChunkOutOfRange`] if `key` is outside the grid.
    pub fn chunk_region_bounded(&self, key: &[u64]) -> Result<Region, StoreError> {
        Ok(self.chunk_region(key)?.bound(&self.array_shape)?)
    }

    /// The region *in chunk-key space* of all chunks intersecting `region`.
    ///
    /// # Errors
    /// Returns a [`RegionError`](crate::region::RegionError) wrapped in
    /// [`StoreError`] on dimensionality mismatch.
    pub fn chunks_in_region(&self, region: &Region) -> Result<Region, StoreError> {
        if region.dimensionality() != self.array_shape.len() {
            return Err(StoreError::Region(
                crate::region::RegionError::IncompatibleDimensionality {
                    expected: self.array_shape.len(),
                    got: region.dimensionality(),
                },
            ));
        }
        let ranges: Vec<std::ops::Range<u64>> =
            izip!(region.to_ranges(), &self.chunk_shape)
                .map(|(r, c)| {
                    if r.is_empty() {
                        0..0
                    } else {
                        r.start / c..(r.end - 1) / c + 1
                    }
                })
                .collect();
        Ok(Region::from_ranges(&ranges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> ChunkGrid {
        ChunkGrid::new("x", vec![10, 7], vec![4, 3])
    }

    #[test]
    fn grid_shape_rounds_up() {
        assert_eq!(grid().grid_shape(), vec![3, 3]);
        assert_eq!(grid().num_chunks(), 9);
    }

    #[test]
    fn interior_chunk_region() {
        let r = grid().chunk_region_bounded(&[1, 1]).unwrap();
        assert_eq!(r.to_ranges(), vec![4..8, 3..6]);
    }

    #[test]
    fn final_chunk_is_truncated() {
        let r = grid().chunk_region_bounded(&[2, 2]).unwrap();
        assert_eq!(r.to_ranges(), vec![8..10, 6..7]);
        assert_eq!(r.shape(), &[2, 1]);
    }

    #[test]
    fn out_of_range_key_is_rejected() {
        assert!(matches!(
            grid().chunk_region(&[3, 0]),
            Err(StoreError::ChunkOutOfRange { .. })
        ));
    }

    #[test]
    fn chunks_in_region_cover_exactly_the_intersecting_chunks() {
        let region = Region::from_ranges(&[3..9, 2..4]);
        let keys = grid().chunks_in_region(&region).unwrap();
        assert_eq!(keys.to_ranges(), vec![0..3, 0..2]);
    }

    #[test]
    fn chunks_in_empty_region_is_empty() {
        let region = Region::from_ranges(&[3..3, 0..7]);
        assert!(grid().chunks_in_region(&region).unwrap().is_empty());
    }
}
