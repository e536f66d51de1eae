//! moesplit engine
//!
//! Serves Mixture-of-Experts models whose expert banks exceed any single
//! accelerator by sharding expert tensors across remote compute endpoints
//! and dispatching the routed matmul (MUL_MAT_ID) in a scatter/gather
//! fashion.
//!
//! The pieces, load-time to serve-time:
//!
//! - [`plan`]: partition the expert (or row) dimension across endpoints in
//!   proportion to operator-supplied memory weights
//! - [`classify`]: decide by name which tensors participate in the split
//! - [`SplitBufferType`] / [`SplitBuffer`]: allocate mirrored remote
//!   sub-buffers and drive byte-accurate shard uploads
//! - [`SplitBuffer::dispatch_mul_mat_id`]: fan out partial compute requests
//!   per inference step and sum the partial outputs
//! - [`profiler`]: per-endpoint timing, load balance, expert activations

pub mod classify;
pub mod config;
pub mod kernel;
pub mod plan;
pub mod profiler;

mod buffer;
mod dispatch;
mod error;
mod tensor;

pub use buffer::{is_rpc_split, Placement, SplitBuffer, SplitBufferType};
pub use classify::is_expert_tensor;
pub use config::parse_config;
pub use error::{EngineError, Result};
pub use plan::{plan_expert, plan_rows, ExpertRange, SplitPlan};
pub use tensor::{DType, TensorDesc};
