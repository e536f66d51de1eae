//! moesplit endpoint client
//!
//! One reliable ordered TCP connection per remote compute endpoint, with
//! blocking request primitives: buffer alloc/free, chunked upload, download
//! and routed partial matmul. Requests on one connection are serialized by
//! an internal mutex.

mod client;
mod endpoint;
mod error;

pub use client::EndpointClient;
pub use endpoint::Endpoint;
pub use error::{ClientError, Result};
