//! MUL_MAT_ID_REQUEST and MUL_MAT_ID_RESPONSE message payloads
//!
//! The request ships the full routing tensor together with the server's
//! local expert range `[expert_lo, expert_hi)`. The server intersects the
//! routing entries with its range and leaves out-of-range token columns
//! zeroed, so partial outputs from different servers sum elementwise into
//! the final result.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::constants::{MsgType, WireDType};
use crate::error::{ProtocolError, Result};
use crate::messages::Payload;

const TAG_INLINE: u8 = 1;
const TAG_HANDLE: u8 = 2;

/// Activation input: inline bytes or a previously uploaded remote buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationRef {
    /// Activation tensor bytes shipped with the request
    Inline(Vec<u8>),
    /// Handle of a remote buffer already holding the activations
    Handle(u64),
}

/// MUL_MAT_ID_REQUEST payload (Client → Server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulMatIdRequestPayload {
    /// Handle of the expert weight shard on this server
    pub weight_handle: u64,
    /// Element type of weights and activations
    pub dtype: WireDType,
    /// Input feature dimension
    pub n_embd: u32,
    /// Output feature dimension per expert
    pub n_ff: u32,
    /// Number of tokens in the batch
    pub n_tokens: u32,
    /// Experts selected per token
    pub top_k: u32,
    /// First expert id owned by this server (inclusive)
    pub expert_lo: u32,
    /// One past the last expert id owned by this server
    pub expert_hi: u32,
    /// Routing tensor, `top_k * n_tokens` expert ids, column per token
    pub routing: Vec<i32>,
    /// Activation tensor `[n_embd, n_tokens]`
    pub activations: ActivationRef,
}

impl Payload for MulMatIdRequestPayload {
    const MSG_TYPE: MsgType = MsgType::MulMatIdRequest;

    fn encode(&self) -> Vec<u8> {
        let routing_bytes = self.routing.len() * 4;
        let act_bytes = match &self.activations {
            ActivationRef::Inline(b) => 9 + b.len(),
            ActivationRef::Handle(_) => 9,
        };
        let mut buf = Vec::with_capacity(37 + routing_bytes + act_bytes);

        buf.write_u64::<LittleEndian>(self.weight_handle).unwrap();
        buf.write_u8(self.dtype.to_u8()).unwrap();
        buf.write_u32::<LittleEndian>(self.n_embd).unwrap();
        buf.write_u32::<LittleEndian>(self.n_ff).unwrap();
        buf.write_u32::<LittleEndian>(self.n_tokens).unwrap();
        buf.write_u32::<LittleEndian>(self.top_k).unwrap();
        buf.write_u32::<LittleEndian>(self.expert_lo).unwrap();
        buf.write_u32::<LittleEndian>(self.expert_hi).unwrap();

        buf.write_u32::<LittleEndian>(self.routing.len() as u32).unwrap();
        for &id in &self.routing {
            buf.write_i32::<LittleEndian>(id).unwrap();
        }

        match &self.activations {
            ActivationRef::Inline(bytes) => {
                buf.write_u8(TAG_INLINE).unwrap();
                buf.write_u64::<LittleEndian>(bytes.len() as u64).unwrap();
                buf.write_all(bytes).unwrap();
            }
            ActivationRef::Handle(handle) => {
                buf.write_u8(TAG_HANDLE).unwrap();
                buf.write_u64::<LittleEndian>(*handle).unwrap();
            }
        }

        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 37 {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut cursor = Cursor::new(data);

        let weight_handle = cursor.read_u64::<LittleEndian>()?;
        let dtype_raw = cursor.read_u8()?;
        let dtype = WireDType::from_u8(dtype_raw).ok_or(ProtocolError::UnknownDType(dtype_raw))?;
        let n_embd = cursor.read_u32::<LittleEndian>()?;
        let n_ff = cursor.read_u32::<LittleEndian>()?;
        let n_tokens = cursor.read_u32::<LittleEndian>()?;
        let top_k = cursor.read_u32::<LittleEndian>()?;
        let expert_lo = cursor.read_u32::<LittleEndian>()?;
        let expert_hi = cursor.read_u32::<LittleEndian>()?;

        let n_routing = cursor.read_u32::<LittleEndian>()? as usize;
        let remaining = data.len() - cursor.position() as usize;
        if remaining < n_routing * 4 + 9 {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut routing = Vec::with_capacity(n_routing);
        for _ in 0..n_routing {
            routing.push(cursor.read_i32::<LittleEndian>()?);
        }

        let tag = cursor.read_u8()?;
        let activations = match tag {
            TAG_INLINE => {
                let nbytes = cursor.read_u64::<LittleEndian>()? as usize;
                let pos = cursor.position() as usize;
                if data.len() != pos + nbytes {
                    return Err(ProtocolError::InvalidPayloadLength);
                }
                let mut bytes = vec![0u8; nbytes];
                cursor.read_exact(&mut bytes)?;
                ActivationRef::Inline(bytes)
            }
            TAG_HANDLE => ActivationRef::Handle(cursor.read_u64::<LittleEndian>()?),
            other => return Err(ProtocolError::UnknownActivationTag(other)),
        };
        if cursor.position() as usize != data.len() {
            return Err(ProtocolError::InvalidPayloadLength);
        }

        Ok(Self {
            weight_handle,
            dtype,
            n_embd,
            n_ff,
            n_tokens,
            top_k,
            expert_lo,
            expert_hi,
            routing,
            activations,
        })
    }
}

/// MUL_MAT_ID_RESPONSE payload (Server → Client)
///
/// Output tensor bytes, `[n_ff, n_tokens]` f32 little-endian, column per
/// token. Columns for tokens with no in-range expert are zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulMatIdResponsePayload {
    pub bytes: Vec<u8>,
}

impl Payload for MulMatIdResponsePayload {
    const MSG_TYPE: MsgType = MsgType::MulMatIdResponse;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.bytes.len());
        buf.write_u64::<LittleEndian>(self.bytes.len() as u64).unwrap();
        buf.write_all(&self.bytes).unwrap();
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut cursor = Cursor::new(data);
        let nbytes = cursor.read_u64::<LittleEndian>()? as usize;
        if data.len() != 8 + nbytes {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut bytes = vec![0u8; nbytes];
        cursor.read_exact(&mut bytes)?;
        Ok(Self { bytes })
    }
}
