//! Tensor descriptors
//!
//! A light view of the tensors the external tensor library hands us: name,
//! element type and up to three dimensions, innermost first. Expert weight
//! tensors are `[n_embd, n_ff, n_expert]` with the expert axis outermost
//! and therefore contiguous in memory.

use moesplit_protocol::WireDType;

use crate::error::{EngineError, Result};

/// Element type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    F16,
}

impl DType {
    /// Bytes per element
    pub fn size(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
        }
    }

    pub fn to_wire(self) -> WireDType {
        match self {
            DType::F32 => WireDType::F32,
            DType::F16 => WireDType::F16,
        }
    }
}

/// Shape and type of one tensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDesc {
    /// Hierarchical tensor name, e.g. `blk.7.ffn_up_exps.weight`
    pub name: String,
    pub dtype: DType,
    /// Dimensions, innermost first; unused trailing dims are 1
    pub ne: [i64; 3],
}

impl TensorDesc {
    pub fn new(name: impl Into<String>, dtype: DType, ne: [i64; 3]) -> Result<Self> {
        if ne.iter().any(|&d| d <= 0) {
            return Err(EngineError::ShapeMismatch(format!(
                "non-positive dimension in {ne:?}"
            )));
        }
        Ok(Self {
            name: name.into(),
            dtype,
            ne,
        })
    }

    /// Total tensor size in bytes
    pub fn nbytes(&self) -> usize {
        self.ne.iter().product::<i64>() as usize * self.dtype.size()
    }

    /// Size of the outermost (expert) dimension
    pub fn n_expert(&self) -> i64 {
        self.ne[2]
    }

    /// Bytes of one expert slice: the two inner dimensions
    pub fn bytes_per_expert(&self) -> usize {
        (self.ne[0] * self.ne[1]) as usize * self.dtype.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let desc = TensorDesc::new("blk.0.ffn_up_exps.weight", DType::F32, [5120, 1408, 384])
            .unwrap();
        assert_eq!(desc.bytes_per_expert(), 5120 * 1408 * 4);
        assert_eq!(desc.nbytes(), desc.bytes_per_expert() * 384);
        assert_eq!(desc.n_expert(), 384);
    }

    #[test]
    fn test_f16_element_size() {
        let desc = TensorDesc::new("t", DType::F16, [8, 4, 2]).unwrap();
        assert_eq!(desc.nbytes(), 8 * 4 * 2 * 2);
    }

    #[test]
    fn test_rejects_zero_dim() {
        assert!(TensorDesc::new("t", DType::F32, [8, 0, 2]).is_err());
    }
}
