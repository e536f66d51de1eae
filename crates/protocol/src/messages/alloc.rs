//! ALLOC_REQUEST and ALLOC_RESPONSE message payloads

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::constants::MsgType;
use crate::error::{ProtocolError, Result};
use crate::messages::Payload;

/// ALLOC_REQUEST payload (Client → Server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequestPayload {
    /// Remote device index on the server
    pub device: u32,
    /// Buffer size in bytes
    pub size: u64,
}

impl Payload for AllocRequestPayload {
    const MSG_TYPE: MsgType = MsgType::AllocRequest;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        buf.write_u32::<LittleEndian>(self.device).unwrap();
        buf.write_u64::<LittleEndian>(self.size).unwrap();
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != 12 {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut cursor = Cursor::new(data);
        let device = cursor.read_u32::<LittleEndian>()?;
        let size = cursor.read_u64::<LittleEndian>()?;
        Ok(Self { device, size })
    }
}

/// ALLOC_RESPONSE payload (Server → Client)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocResponsePayload {
    /// Opaque remote buffer handle, nonzero
    pub handle: u64,
}

impl Payload for AllocResponsePayload {
    const MSG_TYPE: MsgType = MsgType::AllocResponse;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.write_u64::<LittleEndian>(self.handle).unwrap();
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != 8 {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut cursor = Cursor::new(data);
        let handle = cursor.read_u64::<LittleEndian>()?;
        Ok(Self { handle })
    }
}
