//! Blocking RPC client for one endpoint

use std::net::TcpStream;
use std::sync::Mutex;

use tracing::debug;

use moesplit_protocol::{
    caps, AllocRequestPayload, CapsRequestPayload, DownloadRequestPayload, ErrorCode, Frame,
    FreeRequestPayload, Message, MulMatIdRequestPayload, Payload, UploadRequestPayload,
    MAX_UPLOAD_CHUNK,
};

use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};

/// Client for one remote compute endpoint.
///
/// Holds a single TCP connection. The connection mutex admits one in-flight
/// request at a time, so callers on different threads see strict
/// request/response ordering. A broken connection is not reconnected; the
/// owning split buffer poisons itself on the first transport error.
pub struct EndpointClient {
    endpoint: Endpoint,
    conn: Mutex<TcpStream>,
    caps_mask: u64,
}

impl EndpointClient {
    /// Connect and probe server capabilities.
    ///
    /// The CAPS probe happens once here; later calls consult the cached
    /// mask. A server that cannot even answer CAPS is unusable.
    pub fn connect(endpoint: Endpoint) -> Result<Self> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).map_err(|e| {
            ClientError::Transport {
                endpoint: endpoint.to_string(),
                detail: format!("connect failed: {e}"),
            }
        })?;
        stream.set_nodelay(true).map_err(|e| ClientError::Transport {
            endpoint: endpoint.to_string(),
            detail: format!("set_nodelay failed: {e}"),
        })?;

        let mut client = Self {
            endpoint,
            conn: Mutex::new(stream),
            caps_mask: 0,
        };
        let response = client.roundtrip(CapsRequestPayload.into_frame())?;
        client.caps_mask = match response {
            Message::CapsResponse(p) => p.mask,
            other => return Err(client.unexpected(&other)),
        };
        debug!(endpoint = %client.endpoint, caps = client.caps_mask, "endpoint connected");
        Ok(client)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Capability mask probed at connect time
    pub fn caps(&self) -> u64 {
        self.caps_mask
    }

    pub fn supports(&self, bit: u64) -> bool {
        self.caps_mask & bit != 0
    }

    /// Allocate a remote buffer of `size` bytes on this endpoint's device
    pub fn alloc(&self, size: u64) -> Result<u64> {
        let request = AllocRequestPayload {
            device: self.endpoint.device,
            size,
        };
        match self.roundtrip(request.into_frame())? {
            Message::AllocResponse(p) => Ok(p.handle),
            other => Err(self.unexpected(&other)),
        }
    }

    /// Release a remote buffer
    pub fn free(&self, handle: u64) -> Result<()> {
        match self.roundtrip(FreeRequestPayload { handle }.into_frame())? {
            Message::FreeResponse(_) => Ok(()),
            other => Err(self.unexpected(&other)),
        }
    }

    /// Write `bytes` into the remote buffer at `offset`, chunking large
    /// writes below the frame limit
    pub fn upload(&self, handle: u64, offset: u64, bytes: &[u8]) -> Result<()> {
        for (i, chunk) in bytes.chunks(MAX_UPLOAD_CHUNK).enumerate() {
            let request = UploadRequestPayload {
                handle,
                offset: offset + (i * MAX_UPLOAD_CHUNK) as u64,
                bytes: chunk.to_vec(),
            };
            match self.roundtrip(request.into_frame())? {
                Message::UploadResponse(_) => {}
                other => return Err(self.unexpected(&other)),
            }
        }
        Ok(())
    }

    /// Read `nbytes` back from the remote buffer at `offset`
    pub fn download(&self, handle: u64, offset: u64, nbytes: u64) -> Result<Vec<u8>> {
        let request = DownloadRequestPayload {
            handle,
            offset,
            nbytes,
        };
        match self.roundtrip(request.into_frame())? {
            Message::DownloadResponse(p) => Ok(p.bytes),
            other => Err(self.unexpected(&other)),
        }
    }

    /// Issue a routed partial matmul, returning the raw output tensor bytes
    pub fn mul_mat_id_partial(&self, request: MulMatIdRequestPayload) -> Result<Vec<u8>> {
        match self.roundtrip(request.into_frame())? {
            Message::MulMatIdResponse(p) => Ok(p.bytes),
            other => Err(self.unexpected(&other)),
        }
    }

    /// Send one frame and read one response frame.
    ///
    /// ERROR frames are mapped into the client error taxonomy here so every
    /// request primitive above only ever sees its own response type.
    fn roundtrip(&self, frame: Frame) -> Result<Message> {
        let mut conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());

        frame.write_to(&mut *conn).map_err(|e| self.transport(format!("send failed: {e}")))?;
        let response =
            Frame::read_from(&mut *conn).map_err(|e| self.transport(format!("recv failed: {e}")))?;
        drop(conn);

        let message = Message::from_frame(response)
            .map_err(|e| self.transport(format!("frame decode failed: {e}")))?;

        match message {
            Message::Error(err) => Err(self.remote_error(err.code, err.message)),
            other => Ok(other),
        }
    }

    fn transport(&self, detail: String) -> ClientError {
        ClientError::Transport {
            endpoint: self.endpoint.to_string(),
            detail,
        }
    }

    fn unexpected(&self, message: &Message) -> ClientError {
        self.transport(format!("unexpected response message: {message:?}"))
    }

    fn remote_error(&self, code: ErrorCode, detail: String) -> ClientError {
        let endpoint = self.endpoint.to_string();
        match code {
            ErrorCode::OutOfMemory => ClientError::RemoteOom { endpoint, detail },
            ErrorCode::Unsupported => ClientError::ProtocolMismatch { endpoint, detail },
            ErrorCode::Compute
            | ErrorCode::BadHandle
            | ErrorCode::BadRequest
            | ErrorCode::Internal => ClientError::RemoteCompute { endpoint, detail },
        }
    }
}

impl std::fmt::Debug for EndpointClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointClient")
            .field("endpoint", &self.endpoint)
            .field("caps", &self.caps_mask)
            .finish()
    }
}
