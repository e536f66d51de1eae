//! Distributed MUL_MAT_ID dispatcher
//!
//! The per-inference-step orchestration. Each endpoint that owns at least
//! one selected expert receives the full routing tensor plus its own
//! expert range; it intersects locally and returns a partial output with
//! zero columns for tokens it does not serve. Partials from different
//! endpoints then sum elementwise into the final output, so no token index
//! remapping is needed anywhere.

use std::time::Instant;

use rayon::prelude::*;
use tracing::warn;

use moesplit_protocol::{caps, ActivationRef, MulMatIdRequestPayload};

use crate::buffer::{SplitBuffer, TensorEntry};
use crate::error::{EngineError, Result};
use crate::kernel::{bytes_to_f32s, f32s_to_bytes, mul_mat_id_f32};
use crate::plan::ExpertRange;
use crate::profiler;
use crate::tensor::DType;

impl SplitBuffer {
    /// Distributed routed matmul over the split weight tensor `weight`.
    ///
    /// `activations` is `[n_embd, n_tokens]` and `routing` is
    /// `[top_k, n_tokens]`, both with one contiguous column per token.
    /// Returns the dense `[n_ff, n_tokens]` output.
    ///
    /// Any endpoint failure fails the whole dispatch; a missing expert
    /// shard has no substitute. All outstanding partials are awaited
    /// before the error is returned.
    pub fn dispatch_mul_mat_id(
        &self,
        weight: &str,
        activations: &[f32],
        routing: &[i32],
        top_k: usize,
        n_tokens: usize,
    ) -> Result<Vec<f32>> {
        self.check_poisoned()?;
        let entry = self.entry_snapshot(weight)?;

        let plan = entry.plan.clone().ok_or_else(|| {
            EngineError::ShapeMismatch(format!("tensor '{weight}' is not split by expert"))
        })?;
        let (n_embd, n_ff) = validate_shapes(&entry, activations, routing, top_k, n_tokens)?;

        let prof = profiler::global();
        for &id in routing {
            prof.record_activation(id as u32);
        }

        // Endpoints whose range intersects the routing tensor; the rest
        // have no work this step
        let active: Vec<(usize, ExpertRange)> = plan
            .ranges()
            .iter()
            .enumerate()
            .filter(|(_, range)| routing.iter().any(|&id| range.contains(id as i64)))
            .map(|(i, &range)| (i, range))
            .collect();

        let all_partial = active
            .iter()
            .all(|&(i, _)| self.buffer_type().client(i).supports(caps::MUL_MAT_ID_PARTIAL));
        if !all_partial {
            return self.dispatch_gather(weight, &entry, activations, routing, top_k, n_tokens);
        }

        let activation_bytes = f32s_to_bytes(activations);
        let partials: Vec<Result<Vec<f32>>> = active
            .par_iter()
            .map(|&(i, range)| {
                self.partial_request(
                    &entry,
                    i,
                    range,
                    &activation_bytes,
                    routing,
                    n_embd,
                    n_ff,
                    top_k,
                    n_tokens,
                )
            })
            .collect();

        let mut out = vec![0.0f32; n_ff * n_tokens];
        let mut first_error = None;
        for partial in partials {
            match partial {
                Ok(values) => {
                    for (o, v) in out.iter_mut().zip(values) {
                        *o += v;
                    }
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn partial_request(
        &self,
        entry: &TensorEntry,
        endpoint: usize,
        range: ExpertRange,
        activation_bytes: &[u8],
        routing: &[i32],
        n_embd: usize,
        n_ff: usize,
        top_k: usize,
        n_tokens: usize,
    ) -> Result<Vec<f32>> {
        let client = self.buffer_type().client(endpoint);
        let shard = entry.shards[endpoint].ok_or_else(|| {
            EngineError::ShapeMismatch(format!(
                "endpoint {endpoint} owns experts of '{}' but holds no shard",
                entry.desc.name
            ))
        })?;

        let request = MulMatIdRequestPayload {
            weight_handle: shard.handle,
            dtype: entry.desc.dtype.to_wire(),
            n_embd: n_embd as u32,
            n_ff: n_ff as u32,
            n_tokens: n_tokens as u32,
            top_k: top_k as u32,
            expert_lo: range.lo as u32,
            expert_hi: range.hi as u32,
            routing: routing.to_vec(),
            activations: ActivationRef::Inline(activation_bytes.to_vec()),
        };

        let started = Instant::now();
        let bytes = client
            .mul_mat_id_partial(request)
            .map_err(|e| self.fail(e))?;
        profiler::global().record_endpoint(endpoint, started.elapsed());

        let values = bytes_to_f32s(&bytes).ok_or_else(|| {
            EngineError::ShapeMismatch(format!(
                "partial output from endpoint {endpoint} is not f32 data"
            ))
        })?;
        if values.len() != n_ff * n_tokens {
            return Err(EngineError::ShapeMismatch(format!(
                "partial output from endpoint {endpoint} has {} values, expected {}",
                values.len(),
                n_ff * n_tokens
            )));
        }
        Ok(values)
    }

    /// Degraded path for servers without partial-matmul support: download
    /// every shard, reconstitute the full weight tensor and run the
    /// single-device routine locally.
    fn dispatch_gather(
        &self,
        weight: &str,
        entry: &TensorEntry,
        activations: &[f32],
        routing: &[i32],
        top_k: usize,
        n_tokens: usize,
    ) -> Result<Vec<f32>> {
        warn!(tensor = %weight, "endpoint lacks partial matmul, using gather fallback");

        let full = self.gather_tensor(weight)?;
        let weights = bytes_to_f32s(&full).ok_or_else(|| {
            EngineError::ShapeMismatch(format!("gathered '{weight}' is not f32 data"))
        })?;

        let n_embd = entry.desc.ne[0] as usize;
        let n_ff = entry.desc.ne[1] as usize;
        Ok(mul_mat_id_f32(
            &weights,
            n_embd,
            n_ff,
            activations,
            routing,
            top_k,
            n_tokens,
            0,
            entry.desc.n_expert(),
        ))
    }
}

/// Validate activation/routing/weight shape consistency, returning
/// `(n_embd, n_ff)`
fn validate_shapes(
    entry: &TensorEntry,
    activations: &[f32],
    routing: &[i32],
    top_k: usize,
    n_tokens: usize,
) -> Result<(usize, usize)> {
    let desc = &entry.desc;
    if desc.dtype != DType::F32 {
        return Err(EngineError::ShapeMismatch(format!(
            "dispatch requires f32 weights, '{}' is {:?}",
            desc.name, desc.dtype
        )));
    }

    let n_embd = desc.ne[0] as usize;
    let n_ff = desc.ne[1] as usize;
    let n_expert = desc.n_expert();

    if n_tokens == 0 || top_k == 0 {
        return Err(EngineError::ShapeMismatch(format!(
            "empty dispatch: top_k={top_k}, n_tokens={n_tokens}"
        )));
    }
    if activations.len() != n_embd * n_tokens {
        return Err(EngineError::ShapeMismatch(format!(
            "activations have {} values, expected {} ({n_embd} x {n_tokens})",
            activations.len(),
            n_embd * n_tokens
        )));
    }
    if routing.len() != top_k * n_tokens {
        return Err(EngineError::ShapeMismatch(format!(
            "routing has {} entries, expected {} ({top_k} x {n_tokens})",
            routing.len(),
            top_k * n_tokens
        )));
    }
    for &id in routing {
        if id < 0 || id as i64 >= n_expert {
            return Err(EngineError::ShapeMismatch(format!(
                "routing id {id} outside [0, {n_expert})"
            )));
        }
    }
    Ok((n_embd, n_ff))
}
