//! moesplit wire protocol
//!
//! Framing and message payloads for the split-buffer RPC protocol: remote
//! buffer management (ALLOC/FREE/UPLOAD/DOWNLOAD), routed partial matmul
//! (MUL_MAT_ID) and capability negotiation (CAPS). All integers are
//! little-endian; every frame carries a CRC32 over its payload.

mod constants;
mod error;
mod frame;
mod messages;

pub use constants::*;
pub use error::{ProtocolError, Result};
pub use frame::Frame;
pub use messages::*;
