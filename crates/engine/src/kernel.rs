//! Reference f32 kernel for the routed matmul
//!
//! The single-device routine used by the gather fallback, and the compute
//! core of the harness test server. Weight layout follows the expert
//! tensor convention: expert `e` is a contiguous `[n_ff, n_embd]` row-major
//! matrix at element offset `e * n_ff * n_embd`.

/// Routed matmul restricted to experts in `[expert_lo, expert_hi)`.
///
/// For token `t` and each selected expert `e = routing[k + t*top_k]` inside
/// the range, accumulates `W_e · x_t` into output column `t`. Columns of
/// tokens with no in-range expert stay zero, so outputs from disjoint
/// ranges sum elementwise into the full result.
#[allow(clippy::too_many_arguments)]
pub fn mul_mat_id_f32(
    weights: &[f32],
    n_embd: usize,
    n_ff: usize,
    activations: &[f32],
    routing: &[i32],
    top_k: usize,
    n_tokens: usize,
    expert_lo: i64,
    expert_hi: i64,
) -> Vec<f32> {
    let mut out = vec![0.0f32; n_ff * n_tokens];

    for t in 0..n_tokens {
        let x = &activations[t * n_embd..(t + 1) * n_embd];
        let y = &mut out[t * n_ff..(t + 1) * n_ff];

        for k in 0..top_k {
            let expert = routing[t * top_k + k] as i64;
            if expert < expert_lo || expert >= expert_hi {
                continue;
            }
            let w = &weights[(expert as usize) * n_ff * n_embd..];
            for (j, yj) in y.iter_mut().enumerate() {
                let row = &w[j * n_embd..j * n_embd + n_embd];
                let mut acc = 0.0f32;
                for (wi, xi) in row.iter().zip(x) {
                    acc += wi * xi;
                }
                *yj += acc;
            }
        }
    }

    out
}

/// Reinterpret f32 values as little-endian bytes
pub fn f32s_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reinterpret little-endian bytes as f32 values; length must divide by 4
pub fn bytes_to_f32s(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_expert_identity() {
        // One 2x2 identity expert, one token, top_k = 1
        let weights = vec![1.0, 0.0, 0.0, 1.0];
        let activations = vec![3.0, 4.0];
        let out = mul_mat_id_f32(&weights, 2, 2, &activations, &[0], 1, 1, 0, 1);
        assert_eq!(out, vec![3.0, 4.0]);
    }

    #[test]
    fn test_top_k_contributions_sum() {
        // Expert 0 doubles, expert 1 negates; token selects both
        let weights = vec![
            2.0, 0.0, 0.0, 2.0, // expert 0
            -1.0, 0.0, 0.0, -1.0, // expert 1
        ];
        let activations = vec![1.0, 5.0];
        let out = mul_mat_id_f32(&weights, 2, 2, &activations, &[0, 1], 2, 1, 0, 2);
        assert_eq!(out, vec![1.0, 5.0]);
    }

    #[test]
    fn test_out_of_range_experts_leave_zero_columns() {
        let weights = vec![1.0; 2 * 2 * 4];
        let activations = vec![1.0, 1.0, 2.0, 2.0];
        // Token 0 routes to expert 0, token 1 to expert 3
        let out = mul_mat_id_f32(&weights, 2, 2, &activations, &[0, 3], 1, 2, 0, 2);
        assert_eq!(&out[0..2], &[2.0, 2.0]);
        assert_eq!(&out[2..4], &[0.0, 0.0]);
    }

    #[test]
    fn test_partial_ranges_sum_to_full() {
        let n_embd = 4;
        let n_ff = 3;
        let n_expert = 6usize;
        let n_tokens = 5;
        let top_k = 2;

        let weights: Vec<f32> = (0..n_expert * n_ff * n_embd)
            .map(|i| (i as f32 * 0.37).sin())
            .collect();
        let activations: Vec<f32> = (0..n_embd * n_tokens)
            .map(|i| (i as f32 * 0.11).cos())
            .collect();
        let routing: Vec<i32> = vec![1, 5, 2, 3, 4, 0, 0, 5, 3, 3];

        let full = mul_mat_id_f32(
            &weights, n_embd, n_ff, &activations, &routing, top_k, n_tokens, 0, 6,
        );
        let lo_half = mul_mat_id_f32(
            &weights, n_embd, n_ff, &activations, &routing, top_k, n_tokens, 0, 3,
        );
        let hi_half = mul_mat_id_f32(
            &weights, n_embd, n_ff, &activations, &routing, top_k, n_tokens, 3, 6,
        );

        for i in 0..full.len() {
            let sum = lo_half[i] + hi_half[i];
            assert!((full[i] - sum).abs() <= 1e-5 * full[i].abs().max(1.0));
        }
    }

    #[test]
    fn test_byte_conversions_roundtrip() {
        let values = vec![0.0f32, -1.5, 3.25, f32::MIN_POSITIVE];
        let bytes = f32s_to_bytes(&values);
        assert_eq!(bytes_to_f32s(&bytes).unwrap(), values);
        assert!(bytes_to_f32s(&bytes[1..]).is_none());
    }
}
