//! The layout planner: stage sequences between two chunk layouts under a
//! memory budget.
//!
//! The working set of a stage `S_in -> S_out` is one destination-chunk
//! accumulation buffer plus the single source chunk held while copying, i.e.
//! `bytes(S_in) + bytes(S_out)`. A plan is a sequence of chunk shapes from
//! the source layout to the target layout in which every adjacent pair fits
//! the budget. Intermediate shapes are found by greedy per-dimension
//! geometric bisection; no optimality is claimed, correctness under the
//! budget is the only property.

use crate::error::PlanError;
use crate::region::RegionError;

/// Recursion guard for the bisection; beyond this the minimal intermediate
/// shape is used directly.
const MAX_BISECTION_DEPTH: usize = 16;

/// One stage of a plan: read chunks of one shape, write chunks of another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// The chunk shape read by this stage.
    pub read_shape: Vec<u64>,
    /// The chunk shape written by this stage.
    pub write_shape: Vec<u64>,
}

impl Stage {
    /// The working set in bytes of one execution unit of this stage.
    #[must_use]
    pub fn working_set(&self, element_size: usize) -> u64 {
        let bytes = chunk_bytes(&self.read_shape, element_size)
            + chunk_bytes(&self.write_shape, element_size);
        u64::try_from(bytes).unwrap_or(u64::MAX)
    }
}

/// A budget-respecting sequence of stages from a source chunk layout to a
/// target chunk layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    shapes: Vec<Vec<u64>>,
}

impl StagePlan {
    /// The number of stages (data movements) in the plan.
    #[must_use]
    pub fn num_stages(&self) -> usize {
        self.shapes.len() - 1
    }

    /// The chunk shapes written by the intermediate stages, in order.
    #[must_use]
    pub fn intermediate_shapes(&self) -> &[Vec<u64>] {
        &self.shapes[1..self.shapes.len() - 1]
    }

    /// Iterate over the stages of the plan.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.shapes.windows(2).map(|pair| Stage {
            read_shape: pair[0].clone(),
            write_shape: pair[1].clone(),
        })
    }
}

fn chunk_bytes(shape: &[u64], element_size: usize) -> u128 {
    shape
        .iter()
        .map(|&l| u128::from(l))
        .product::<u128>()
        .saturating_mul(element_size as u128)
}

/// Clamp `shape` to `1..=array_shape` along each dimension.
fn clamp(shape: &[u64], array_shape: &[u64]) -> Vec<u64> {
    shape
        .iter()
        .zip(array_shape)
        .map(|(&l, &full)| l.clamp(1, full.max(1)))
        .collect()
}

/// The smallest useful intermediate between two shapes: length 1 along every
/// dimension where they differ, the shared length elsewhere.
fn minimal_between(a: &[u64], b: &[u64]) -> Vec<u64> {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| if x == y { x } else { 1 })
        .collect()
}

/// The per-dimension geometric mean of two shapes, rounded down. Flooring
/// keeps the intermediate's footprint at or below the larger endpoint's,
/// which is what bounds every pair against the feasibility check.
fn bisect(a: &[u64], b: &[u64], array_shape: &[u64]) -> Vec<u64> {
    let mid: Vec<u64> = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| ((x as f64) * (y as f64)).sqrt() as u64)
        .collect();
    clamp(&mid, array_shape)
}

/// Compute a stage plan for one variable.
///
/// `source_chunks` and `target_chunks` are the chunk shapes of the source
/// and target layouts, `array_shape` the full dimension sizes (all three
/// aligned to the variable's dimension order), `element_size` the byte width
/// of one element, and `budget` the bytes one execution unit may hold.
///
/// # Errors
/// Returns [`PlanError::BudgetTooSmall`] if no stage sequence fits the
/// budget — in particular when the budget cannot hold a single element, or
/// cannot hold the source or target chunk next to the smallest possible
/// intermediate. Returns a dimensionality error if the shapes disagree in
/// length.
pub fn plan_stages(
    variable: &str,
    source_chunks: &[u64],
    target_chunks: &[u64],
    array_shape: &[u64],
    element_size: usize,
    budget: u64,
) -> Result<StagePlan, PlanError> {
    if source_chunks.len() != target_chunks.len() || source_chunks.len() != array_shape.len() {
        return Err(PlanError::Region(RegionError::IncompatibleDimensionality {
            expected: array_shape.len(),
            got: if source_chunks.len() != array_shape.len() {
                source_chunks.len()
            } else {
                target_chunks.len()
            },
        }));
    }
    let source = clamp(source_chunks, array_shape);
    let target = clamp(target_chunks, array_shape);
    let budget_bytes = u128::from(budget);

    let direct = chunk_bytes(&source, element_size) + chunk_bytes(&target, element_size);
    if direct <= budget_bytes {
        return Ok(StagePlan {
            shapes: vec![source, target],
        });
    }

    // Feasibility: the minimal intermediate must fit next to both endpoints.
    let minimal = minimal_between(&source, &target);
    let required = (chunk_bytes(&source, element_size) + chunk_bytes(&minimal, element_size))
        .max(chunk_bytes(&minimal, element_size) + chunk_bytes(&target, element_size));
    if required > budget_bytes {
        return Err(PlanError::BudgetTooSmall {
            variable: variable.to_string(),
            budget,
            required: u64::try_from(required.min(direct)).unwrap_or(u64::MAX),
        });
    }

    let mut shapes = vec![source.clone()];
    fill_between(
        variable,
        &source,
        &target,
        &minimal,
        array_shape,
        element_size,
        budget_bytes,
        0,
        &mut shapes,
    )?;
    shapes.push(target);
    Ok(StagePlan { shapes })
}

/// Insert intermediate shapes between `a` and `b` until every adjacent pair
/// fits the budget. When bisection stalls (or hits the depth cap), the
/// fallback is `minimal`, the smallest intermediate between the *overall*
/// source and target — never a pair-local minimal, which can retain a large
/// dimension the two intermediates happen to agree on. The feasibility check
/// in [`plan_stages`] guarantees `minimal` fits next to any intermediate, so
/// the error branch means no sequence exists; an over-budget pair is never
/// emitted silently.
#[allow(clippy::too_many_arguments)]
fn fill_between(
    variable: &str,
    a: &[u64],
    b: &[u64],
    minimal: &[u64],
    array_shape: &[u64],
    element_size: usize,
    budget: u128,
    depth: usize,
    out: &mut Vec<Vec<u64>>,
) -> Result<(), PlanError> {
    let pair = chunk_bytes(a, element_size) + chunk_bytes(b, element_size);
    if pair <= budget {
        return Ok(());
    }
    let mut mid = bisect(a, b, array_shape);
    if mid == a || mid == b || depth >= MAX_BISECTION_DEPTH {
        mid = minimal.to_vec();
        if mid == a || mid == b {
            return Err(PlanError::BudgetTooSmall {
                variable: variable.to_string(),
                budget: u64::try_from(budget).unwrap_or(u64::MAX),
                required: u64::try_from(pair).unwrap_or(u64::MAX),
            });
        }
    }
    fill_between(
        variable,
        a,
        &mid,
        minimal,
        array_shape,
        element_size,
        budget,
        depth + 1,
        out,
    )?;
    out.push(mid.clone());
    fill_between(
        variable,
        &mid,
        b,
        minimal,
        array_shape,
        element_size,
        budget,
        depth + 1,
        out,
    )
}
