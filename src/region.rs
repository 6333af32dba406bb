//! Rectangular regions of an N-dimensional index space.
//!
//! A [`Region`] is the unit of geometry in this crate: chunk extents, chunk
//! assembly buffers, and chunk-key grids are all regions. A region is defined
//! by a `start` index and a `shape`, both with one entry per dimension.

use std::ops::Range;

use itertools::izip;
use thiserror::Error;

/// An error arising from region arithmetic.
#[derive(Debug, Error)]
pub enum RegionError {
    /// The dimensionality of two regions (or a region and an index) differ.
    #[error("region dimensionality {got} does not match expected dimensionality {expected}")]
    IncompatibleDimensionality {
        /// The expected dimensionality.
        expected: usize,
        /// The dimensionality encountered.
        got: usize,
    },
    /// An offset exceeds the start of the region it is subtracted from.
    #[error("offset {offset:?} is not within region starting at {start:?}")]
    OffsetOutOfBounds {
        /// The region start.
        start: Vec<u64>,
        /// The offending offset.
        offset: Vec<u64>,
    },
}

/// A rectangular region of an N-dimensional index space.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Region {
    start: Vec<u64>,
    shape: Vec<u64>,
}

impl Region {
    /// Create a region from `start` and `shape`.
    ///
    /// # Errors
    /// Returns [`RegionError::IncompatibleDimensionality`] if the lengths of
    /// `start` and `shape` differ.
    pub fn new(start: Vec<u64>, shape: Vec<u64>) -> Result<Self, RegionError> {
        if start.len() == shape.len() {
            Ok(Self { start, shape })
        } else {
            Err(RegionError::IncompatibleDimensionality {
                expected: start.len(),
                got: shape.len(),
            })
        }
    }

    /// Create a region at the origin with the given `shape`.
    #[must_use]
    pub fn with_shape(shape: Vec<u64>) -> Self {
        Self {
            start: vec![0; shape.len()],
            shape,
        }
    }

    /// Create a region from per-dimension index ranges.
    #[must_use]
    pub fn from_ranges(ranges: &[Range<u64>]) -> Self {
        let (start, shape) = ranges
            .iter()
            .map(|r| (r.start, r.end.saturating_sub(r.start)))
            .unzip();
        Self { start, shape }
    }

    /// The start index of the region.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// The shape of the region.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The exclusive end index of the region.
    #[must_use]
    pub fn end_exc(&self) -> Vec<u64> {
        izip!(&self.start, &self.shape).map(|(s, l)| s + l).collect()
    }

    /// The number of dimensions of the region.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    /// The number of elements covered by the region.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// The number of elements covered by the region as a [`usize`].
    ///
    /// # Panics
    /// Panics if the number of elements exceeds [`usize::MAX`].
    #[must_use]
    pub fn num_elements_usize(&self) -> usize {
        usize::try_from(self.num_elements()).unwrap()
    }

    /// Returns true if the region covers no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|&l| l == 0)
    }

    /// The per-dimension index ranges of the region.
    #[must_use]
    pub fn to_ranges(&self) -> Vec<Range<u64>> {
        izip!(&self.start, &self.shape)
            .map(|(s, l)| *s..s + l)
            .collect()
    }

    /// The intersection of this region with `other`.
    ///
    /// The result is empty (not an error) if the regions are disjoint.
    ///
    /// # Errors
    /// Returns [`RegionError::IncompatibleDimensionality`] if the
    /// dimensionalities differ.
    pub fn overlap(&self, other: &Region) -> Result<Region, RegionError> {
        if other.dimensionality() != self.dimensionality() {
            return Err(RegionError::IncompatibleDimensionality {
                expected: self.dimensionality(),
                got: other.dimensionality(),
            });
        }
        let ranges: Vec<Range<u64>> = izip!(self.to_ranges(), other.to_ranges())
            .map(|(a, b)| {
                let start = a.start.max(b.start);
                let end = a.end.min(b.end).max(start);
                start..end
            })
            .collect();
        Ok(Region::from_ranges(&ranges))
    }

    /// Rebase the region onto an origin at `offset`.
    ///
    /// # Errors
    /// Returns an error if `offset` has the wrong dimensionality or exceeds
    /// the region start along any dimension.
    pub fn relative_to(&self, offset: &[u64]) -> Result<Region, RegionError> {
        if offset.len() != self.dimensionality() {
            return Err(RegionError::IncompatibleDimensionality {
                expected: self.dimensionality(),
                got: offset.len(),
            });
        }
        let start = izip!(&self.start, offset)
            .map(|(s, o)| {
                s.checked_sub(*o)
                    .ok_or_else(|| RegionError::OffsetOutOfBounds {
                        start: self.start.clone(),
                        offset: offset.to_vec(),
                    })
            })
            .collect::<Result<Vec<u64>, RegionError>>()?;
        Ok(Region {
            start,
            shape: self.shape.clone(),
        })
    }

    /// Clamp the region so its exclusive end does not exceed `end`.
    ///
    /// # Errors
    /// Returns [`RegionError::IncompatibleDimensionality`] if `end` has the
    /// wrong dimensionality.
    pub fn bound(&self, end: &[u64]) -> Result<Region, RegionError> {
        if end.len() != self.dimensionality() {
            return Err(RegionError::IncompatibleDimensionality {
                expected: self.dimensionality(),
                got: end.len(),
            });
        }
        let ranges: Vec<Range<u64>> = izip!(self.to_ranges(), end)
            .map(|(r, e)| {
                let start = r.start.min(*e);
                start..r.end.min(*e).max(start)
            })
            .collect();
        Ok(Region::from_ranges(&ranges))
    }

    /// Iterate over every index in the region, last dimension fastest.
    #[must_use]
    pub fn indices(&self) -> Indices<'_> {
        Indices {
            region: self,
            next: if self.is_empty() || self.dimensionality() == 0 {
                None
            } else {
                Some(self.start.clone())
            },
        }
    }

    /// Iterate over the rows of the region.
    ///
    /// A row is a run of elements contiguous along the last dimension; the
    /// iterator yields the start index of each row. Every row has length
    /// `shape().last()`. Unlike a maximal-contiguity decomposition, rows pair
    /// up one-to-one between two equally shaped regions embedded in arrays of
    /// different shapes, which is what chunk assembly needs.
    #[must_use]
    pub fn rows(&self) -> Rows<'_> {
        let lead_dims = self.dimensionality().saturating_sub(1);
        Rows {
            region: self,
            next: if self.is_empty() || self.dimensionality() == 0 {
                None
            } else {
                Some(self.start[..lead_dims].to_vec())
            },
        }
    }

    /// Iterate over the rows of the region, linearised into an enclosing
    /// array of shape `array_shape` (C order).
    ///
    /// Yields `(linearised start, row length)` pairs.
    ///
    /// # Errors
    /// Returns an error if `array_shape` has the wrong dimensionality or does
    /// not enclose the region.
    pub fn linearised_rows(&self, array_shape: &[u64]) -> Result<LinearisedRows<'_>, RegionError> {
        if array_shape.len() != self.dimensionality() {
            return Err(RegionError::IncompatibleDimensionality {
                expected: self.dimensionality(),
                got: array_shape.len(),
            });
        }
        if izip!(self.end_exc(), array_shape).any(|(e, s)| e > *s) {
            return Err(RegionError::OffsetOutOfBounds {
                start: self.end_exc(),
                offset: array_shape.to_vec(),
            });
        }
        Ok(LinearisedRows {
            rows: self.rows(),
            array_shape: array_shape.to_vec(),
            row_length: self.shape.last().copied().unwrap_or(0),
        })
    }
}

/// Linearise `indices` into an array of shape `shape` (C order).
#[must_use]
pub fn ravel_indices(indices: &[u64], shape: &[u64]) -> u64 {
    izip!(indices, shape).fold(0, |acc, (i, s)| acc * s + i)
}

/// Iterator over every index in a [`Region`], last dimension fastest.
pub struct Indices<'a> {
    region: &'a Region,
    next: Option<Vec<u64>>,
}

impl Iterator for Indices<'_> {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = advance(&current, self.region.start(), self.region.shape());
        Some(current)
    }
}

/// Iterator over row start indices of a [`Region`].
pub struct Rows<'a> {
    region: &'a Region,
    /// Odometer over the leading dimensions only.
    next: Option<Vec<u64>>,
}

impl Iterator for Rows<'_> {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        let lead = self.next.take()?;
        let lead_dims = lead.len();
        self.next = advance(
            &lead,
            &self.region.start()[..lead_dims],
            &self.region.shape()[..lead_dims],
        );
        let mut row = lead;
        row.push(self.region.start()[lead_dims]);
        Some(row)
    }
}

/// Iterator over `(linearised start, row length)` pairs of a [`Region`].
pub struct LinearisedRows<'a> {
    rows: Rows<'a>,
    array_shape: Vec<u64>,
    row_length: u64,
}

impl Iterator for LinearisedRows<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some((ravel_indices(&row, &self.array_shape), self.row_length))
    }
}

/// Advance an odometer index within `start`/`shape`, incrementing the last
/// dimension fastest. Returns [`None`] once exhausted.
fn advance(current: &[u64], start: &[u64], shape: &[u64]) -> Option<Vec<u64>> {
    let mut next = current.to_vec();
    let dims = current.len();
    if dims == 0 {
        return None;
    }
    for d in (0..dims).rev() {
        next[d] += 1;
        if next[d] < start[d] + shape[d] {
            return Some(next);
        }
        next[d] = start[d];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_and_rebase() {
        let a = Region::from_ranges(&[2..6, 0..4]);
        let b = Region::from_ranges(&[4..10, 3..8]);
        let o = a.overlap(&b).unwrap();
        assert_eq!(o.to_ranges(), vec![4..6, 3..4]);
        let rebased = o.relative_to(a.start()).unwrap();
        assert_eq!(rebased.to_ranges(), vec![2..4, 3..4]);
    }

    #[test]
    fn overlap_disjoint_is_empty() {
        let a = Region::from_ranges(&[0..2, 0..2]);
        let b = Region::from_ranges(&[5..6, 0..2]);
        assert!(a.overlap(&b).unwrap().is_empty());
    }

    #[test]
    fn overlap_dimensionality_mismatch() {
        let a = Region::with_shape(vec![2, 2]);
        let b = Region::with_shape(vec![2]);
        assert!(a.overlap(&b).is_err());
    }

    #[test]
    fn bound_truncates_final_extent() {
        let r = Region::from_ranges(&[4..8, 6..9]);
        let b = r.bound(&[6, 7]).unwrap();
        assert_eq!(b.to_ranges(), vec![4..6, 6..7]);
    }

    #[test]
    fn relative_to_underflow_is_an_error() {
        let r = Region::from_ranges(&[1..3]);
        assert!(r.relative_to(&[2]).is_err());
    }

    #[test]
    fn indices_are_row_major() {
        let r = Region::from_ranges(&[1..3, 0..2]);
        let indices: Vec<Vec<u64>> = r.indices().collect();
        assert_eq!(
            indices,
            vec![vec![1, 0], vec![1, 1], vec![2, 0], vec![2, 1]]
        );
    }

    #[test]
    fn indices_of_empty_region() {
        let r = Region::from_ranges(&[0..0, 0..3]);
        assert_eq!(r.indices().count(), 0);
    }

    #[test]
    fn rows_cover_the_region() {
        let r = Region::from_ranges(&[1..3, 2..4, 5..8]);
        let rows: Vec<Vec<u64>> = r.rows().collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], vec![1, 2, 5]);
        assert_eq!(rows[3], vec![2, 3, 5]);
    }

    #[test]
    fn rows_of_one_dimensional_region() {
        let r = Region::from_ranges(&[3..7]);
        let rows: Vec<Vec<u64>> = r.rows().collect();
        assert_eq!(rows, vec![vec![3]]);
    }

    #[test]
    fn linearised_rows_match_manual_ravel() {
        // 4x3 array, lower-right 2x2 region: rows at 7 and 10, length 2.
        let r = Region::from_ranges(&[2..4, 1..3]);
        let runs: Vec<(u64, u64)> = r.linearised_rows(&[4, 3]).unwrap().collect();
        assert_eq!(runs, vec![(7, 2), (10, 2)]);
    }

    #[test]
    fn linearised_rows_reject_non_enclosing_shape() {
        let r = Region::from_ranges(&[2..4]);
        assert!(r.linearised_rows(&[3]).is_err());
    }
}
