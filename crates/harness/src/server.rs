//! In-process reference server
//!
//! Speaks the real wire protocol over a loopback TCP listener: a buffer
//! table keyed by handle, the f32 reference kernel for partial matmuls and
//! a configurable capability mask so tests can stand in for legacy servers.
//! One handler thread per connection; buffer state is shared across
//! connections.

use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::debug;

use moesplit_client::Endpoint;
use moesplit_engine::kernel::{bytes_to_f32s, f32s_to_bytes, mul_mat_id_f32};
use moesplit_protocol::{
    caps, ActivationRef, AllocResponsePayload, CapsResponsePayload, DownloadResponsePayload,
    ErrorCode, ErrorPayload, Frame, FreeResponsePayload, Message, MulMatIdRequestPayload,
    MulMatIdResponsePayload, Payload, UploadResponsePayload, WireDType,
};

use crate::error::Result;

struct ServerState {
    caps_mask: u64,
    max_alloc: u64,
    next_handle: AtomicU64,
    buffers: Mutex<HashMap<u64, Vec<u8>>>,
}

/// A loopback compute server for tests
pub struct TestServer {
    endpoint: Endpoint,
    state: Arc<ServerState>,
}

impl TestServer {
    /// Spawn a server supporting every command
    pub fn spawn() -> Result<Self> {
        Self::spawn_constrained(caps::ALL, u64::MAX)
    }

    /// Spawn a server with a restricted capability mask
    pub fn spawn_with_caps(caps_mask: u64) -> Result<Self> {
        Self::spawn_constrained(caps_mask, u64::MAX)
    }

    /// Spawn a server that refuses allocations above `max_alloc` bytes
    pub fn spawn_constrained(caps_mask: u64, max_alloc: u64) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(ServerState {
            caps_mask,
            max_alloc,
            next_handle: AtomicU64::new(1),
            buffers: Mutex::new(HashMap::new()),
        });

        let accept_state = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let conn_state = accept_state.clone();
                thread::spawn(move || handle_connection(stream, conn_state));
            }
        });

        Ok(Self {
            endpoint: Endpoint::new("127.0.0.1", port, 0),
            state,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Number of live remote buffers, for teardown assertions
    pub fn buffer_count(&self) -> usize {
        self.state.buffers.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) {
    loop {
        let frame = match Frame::read_from(&mut stream) {
            Ok(frame) => frame,
            // Client hung up or sent garbage; either way this connection is done
            Err(e) => {
                debug!("connection closed: {e}");
                return;
            }
        };

        let response = match Message::from_frame(frame) {
            Ok(message) => handle_message(message, &state),
            Err(e) => ErrorPayload::new(ErrorCode::BadRequest, e.to_string()).into_frame(),
        };

        if response.write_to(&mut stream).is_err() {
            return;
        }
    }
}

fn handle_message(message: Message, state: &ServerState) -> Frame {
    match message {
        Message::CapsRequest(_) => CapsResponsePayload {
            mask: state.caps_mask,
        }
        .into_frame(),

        Message::AllocRequest(req) => {
            if state.caps_mask & caps::ALLOC == 0 {
                return unsupported("ALLOC");
            }
            if req.size > state.max_alloc {
                return ErrorPayload::new(
                    ErrorCode::OutOfMemory,
                    format!("alloc of {} bytes refused", req.size),
                )
                .into_frame();
            }
            let handle = state.next_handle.fetch_add(1, Ordering::Relaxed);
            let mut buffers = state.buffers.lock().unwrap_or_else(|p| p.into_inner());
            buffers.insert(handle, vec![0u8; req.size as usize]);
            AllocResponsePayload { handle }.into_frame()
        }

        Message::FreeRequest(req) => {
            if state.caps_mask & caps::FREE == 0 {
                return unsupported("FREE");
            }
            let mut buffers = state.buffers.lock().unwrap_or_else(|p| p.into_inner());
            match buffers.remove(&req.handle) {
                Some(_) => FreeResponsePayload.into_frame(),
                None => bad_handle(req.handle),
            }
        }

        Message::UploadRequest(req) => {
            if state.caps_mask & caps::UPLOAD == 0 {
                return unsupported("UPLOAD");
            }
            let mut buffers = state.buffers.lock().unwrap_or_else(|p| p.into_inner());
            let Some(buffer) = buffers.get_mut(&req.handle) else {
                return bad_handle(req.handle);
            };
            let start = req.offset as usize;
            let end = start + req.bytes.len();
            if end > buffer.len() {
                return ErrorPayload::new(
                    ErrorCode::BadRequest,
                    format!("write of {}..{} exceeds buffer of {}", start, end, buffer.len()),
                )
                .into_frame();
            }
            buffer[start..end].copy_from_slice(&req.bytes);
            UploadResponsePayload.into_frame()
        }

        Message::DownloadRequest(req) => {
            if state.caps_mask & caps::DOWNLOAD == 0 {
                return unsupported("DOWNLOAD");
            }
            let buffers = state.buffers.lock().unwrap_or_else(|p| p.into_inner());
            let Some(buffer) = buffers.get(&req.handle) else {
                return bad_handle(req.handle);
            };
            let start = req.offset as usize;
            let end = start + req.nbytes as usize;
            if end > buffer.len() {
                return ErrorPayload::new(
                    ErrorCode::BadRequest,
                    format!("read of {}..{} exceeds buffer of {}", start, end, buffer.len()),
                )
                .into_frame();
            }
            DownloadResponsePayload {
                bytes: buffer[start..end].to_vec(),
            }
            .into_frame()
        }

        Message::MulMatIdRequest(req) => {
            if state.caps_mask & caps::MUL_MAT_ID_PARTIAL == 0 {
                return unsupported("MUL_MAT_ID_PARTIAL");
            }
            match partial_mul_mat_id(req, state) {
                Ok(bytes) => MulMatIdResponsePayload { bytes }.into_frame(),
                Err(frame) => frame,
            }
        }

        // Response and error frames are never requests
        other => ErrorPayload::new(
            ErrorCode::BadRequest,
            format!("not a request message: {other:?}"),
        )
        .into_frame(),
    }
}

/// Run the routed matmul over the locally held expert shard.
///
/// The shard holds experts `[expert_lo, expert_hi)` starting at offset 0,
/// so routing ids are rebased before the range-filtered kernel runs.
fn partial_mul_mat_id(
    req: MulMatIdRequestPayload,
    state: &ServerState,
) -> std::result::Result<Vec<u8>, Frame> {
    if req.dtype != WireDType::F32 {
        return Err(
            ErrorPayload::new(ErrorCode::Compute, format!("unsupported dtype {:?}", req.dtype))
                .into_frame(),
        );
    }

    let n_embd = req.n_embd as usize;
    let n_ff = req.n_ff as usize;
    let n_tokens = req.n_tokens as usize;
    let top_k = req.top_k as usize;
    let local_width = (req.expert_hi - req.expert_lo) as usize;

    let buffers = state.buffers.lock().unwrap_or_else(|p| p.into_inner());

    let Some(weight_bytes) = buffers.get(&req.weight_handle) else {
        return Err(bad_handle(req.weight_handle));
    };
    if weight_bytes.len() != local_width * n_ff * n_embd * 4 {
        return Err(ErrorPayload::new(
            ErrorCode::Compute,
            format!(
                "weight shard has {} bytes, expected {} experts of {}x{}",
                weight_bytes.len(),
                local_width,
                n_ff,
                n_embd
            ),
        )
        .into_frame());
    }
    let Some(weights) = bytes_to_f32s(weight_bytes) else {
        return Err(ErrorPayload::new(ErrorCode::Compute, "weight shard is not f32").into_frame());
    };

    let activation_bytes = match &req.activations {
        ActivationRef::Inline(bytes) => bytes.clone(),
        ActivationRef::Handle(handle) => match buffers.get(handle) {
            Some(bytes) => bytes.clone(),
            None => return Err(bad_handle(*handle)),
        },
    };
    drop(buffers);

    let Some(activations) = bytes_to_f32s(&activation_bytes) else {
        return Err(ErrorPayload::new(ErrorCode::Compute, "activations are not f32").into_frame());
    };
    if activations.len() != n_embd * n_tokens || req.routing.len() != top_k * n_tokens {
        return Err(ErrorPayload::new(ErrorCode::Compute, "inconsistent shapes").into_frame());
    }

    // Rebase routing onto the shard: in-range ids fall in [0, width),
    // everything else leaves its token column zero
    let local_routing: Vec<i32> = req
        .routing
        .iter()
        .map(|&id| id - req.expert_lo as i32)
        .collect();

    let out = mul_mat_id_f32(
        &weights,
        n_embd,
        n_ff,
        &activations,
        &local_routing,
        top_k,
        n_tokens,
        0,
        local_width as i64,
    );
    Ok(f32s_to_bytes(&out))
}

fn unsupported(command: &str) -> Frame {
    ErrorPayload::new(ErrorCode::Unsupported, format!("{command} not supported")).into_frame()
}

fn bad_handle(handle: u64) -> Frame {
    ErrorPayload::new(ErrorCode::BadHandle, format!("unknown handle {handle}")).into_frame()
}
