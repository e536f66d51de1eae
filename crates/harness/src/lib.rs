//! moesplit test harness
//!
//! An in-process reference server speaking the real wire protocol, plus the
//! end-to-end integration tests validating that distributed dispatch
//! produces the same results as single-device compute.

mod error;
mod server;

pub use error::{HarnessError, Result};
pub use server::TestServer;
