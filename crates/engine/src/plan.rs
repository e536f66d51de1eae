//! Split planner
//!
//! Partitions the expert (or row) dimension of a tensor into disjoint
//! half-open ranges, one per endpoint, with widths proportional to the
//! normalized endpoint weights. The ranges always cover `[0, dim)` exactly:
//! boundaries are floored cumulative sums and the last endpoint absorbs the
//! remainder.

use crate::error::{EngineError, Result};

use moesplit_protocol::MAX_ENDPOINTS;

/// Half-open range `[lo, hi)` over the split dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpertRange {
    pub lo: i64,
    pub hi: i64,
}

impl ExpertRange {
    pub fn width(&self) -> i64 {
        self.hi - self.lo
    }

    pub fn is_empty(&self) -> bool {
        self.hi <= self.lo
    }

    pub fn contains(&self, id: i64) -> bool {
        id >= self.lo && id < self.hi
    }
}

/// The per-endpoint range assignment for one tensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    ranges: Vec<ExpertRange>,
}

impl SplitPlan {
    pub fn ranges(&self) -> &[ExpertRange] {
        &self.ranges
    }

    pub fn n_endpoints(&self) -> usize {
        self.ranges.len()
    }

    pub fn range(&self, endpoint: usize) -> ExpertRange {
        self.ranges[endpoint]
    }

    /// The endpoint owning `expert_id`. N is at most 16, a linear scan.
    pub fn owner_of(&self, expert_id: i64) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(expert_id))
    }
}

/// Replace an all-zero weight vector with uniform weights, otherwise scale
/// to sum 1. Negative and non-finite weights are rejected.
pub(crate) fn normalize_weights(weights: &[f32]) -> Result<Vec<f32>> {
    if weights.is_empty() {
        return Err(EngineError::Config("empty weight list".to_string()));
    }
    if weights.len() > MAX_ENDPOINTS {
        return Err(EngineError::Config(format!(
            "{} endpoints exceeds the maximum of {MAX_ENDPOINTS}",
            weights.len()
        )));
    }
    for (i, &w) in weights.iter().enumerate() {
        if !w.is_finite() || w < 0.0 {
            return Err(EngineError::Config(format!(
                "invalid weight {w} for endpoint {i}"
            )));
        }
    }

    let sum: f32 = weights.iter().sum();
    if sum == 0.0 {
        let uniform = 1.0 / weights.len() as f32;
        return Ok(vec![uniform; weights.len()]);
    }
    Ok(weights.iter().map(|&w| w / sum).collect())
}

/// Plan the expert-dimension split for `n_expert` experts.
///
/// Every expert ends up owned by exactly one endpoint. An interior range
/// may be empty only when its weight is exactly zero; for nonzero weights
/// that floored to nothing, one expert is borrowed from the larger
/// nonempty neighbor.
pub fn plan_expert(n_expert: i64, weights: &[f32]) -> Result<SplitPlan> {
    let normalized = normalize_weights(weights)?;
    let n = normalized.len();
    if n_expert <= 0 {
        return Err(EngineError::Config(format!(
            "invalid expert count {n_expert}"
        )));
    }
    if n_expert < n as i64 {
        return Err(EngineError::Config(format!(
            "{n} endpoints cannot split {n_expert} experts"
        )));
    }

    let mut ranges = cumulative_ranges(n_expert, &normalized, 1);
    rescue_starved_ranges(&mut ranges, &normalized);
    Ok(SplitPlan { ranges })
}

/// Plan a row split with boundaries aligned down to `rounding`.
///
/// The legacy mode for dense row-sharded tensors. No donation pass: a zero
/// width from alignment is allowed, and the last endpoint absorbs whatever
/// the alignment left over.
pub fn plan_rows(nrows: i64, weights: &[f32], rounding: i64) -> Result<SplitPlan> {
    let normalized = normalize_weights(weights)?;
    if nrows <= 0 {
        return Err(EngineError::Config(format!("invalid row count {nrows}")));
    }
    if rounding <= 0 {
        return Err(EngineError::Config(format!("invalid rounding {rounding}")));
    }

    let ranges = cumulative_ranges(nrows, &normalized, rounding);
    Ok(SplitPlan { ranges })
}

/// Floored cumulative boundaries: `lo_i = floor(dim * cum_i)` aligned down
/// to `rounding`; `hi_i = lo_{i+1}` and the final endpoint ends at `dim`.
fn cumulative_ranges(dim: i64, normalized: &[f32], rounding: i64) -> Vec<ExpertRange> {
    let n = normalized.len();
    let mut lows = Vec::with_capacity(n);
    let mut cumulative = 0.0f64;
    for &w in normalized {
        let mut lo = (dim as f64 * cumulative) as i64;
        lo -= lo % rounding;
        lows.push(lo);
        cumulative += w as f64;
    }

    (0..n)
        .map(|i| ExpertRange {
            lo: lows[i],
            hi: if i + 1 < n { lows[i + 1] } else { dim },
        })
        .collect()
}

/// Donate one expert to each empty range whose weight is nonzero, taking
/// it from the larger nonempty neighbor. The donor keeps at least one
/// expert so the pass cannot cascade.
fn rescue_starved_ranges(ranges: &mut [ExpertRange], normalized: &[f32]) {
    let n = ranges.len();
    for i in 0..n {
        if !ranges[i].is_empty() || normalized[i] == 0.0 {
            continue;
        }

        let prev_width = if i > 0 { ranges[i - 1].width() } else { 0 };
        let next_width = if i + 1 < n { ranges[i + 1].width() } else { 0 };

        if next_width >= prev_width && next_width >= 2 {
            ranges[i].hi += 1;
            ranges[i + 1].lo += 1;
        } else if prev_width >= 2 {
            ranges[i - 1].hi -= 1;
            ranges[i].lo -= 1;
        }
    }
}
