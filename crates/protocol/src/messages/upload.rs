//! UPLOAD_REQUEST and UPLOAD_RESPONSE message payloads

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::constants::MsgType;
use crate::error::{ProtocolError, Result};
use crate::messages::Payload;

/// UPLOAD_REQUEST payload (Client → Server)
///
/// Writes `bytes` into the remote buffer at `offset`. A full tensor write
/// larger than the chunk limit travels as several of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequestPayload {
    /// Target buffer handle
    pub handle: u64,
    /// Byte offset within the buffer
    pub offset: u64,
    /// Bytes to write
    pub bytes: Vec<u8>,
}

impl Payload for UploadRequestPayload {
    const MSG_TYPE: MsgType = MsgType::UploadRequest;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24 + self.bytes.len());
        buf.write_u64::<LittleEndian>(self.handle).unwrap();
        buf.write_u64::<LittleEndian>(self.offset).unwrap();
        buf.write_u64::<LittleEndian>(self.bytes.len() as u64).unwrap();
        buf.write_all(&self.bytes).unwrap();
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 24 {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut cursor = Cursor::new(data);
        let handle = cursor.read_u64::<LittleEndian>()?;
        let offset = cursor.read_u64::<LittleEndian>()?;
        let nbytes = cursor.read_u64::<LittleEndian>()? as usize;

        if data.len() != 24 + nbytes {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut bytes = vec![0u8; nbytes];
        cursor.read_exact(&mut bytes)?;

        Ok(Self {
            handle,
            offset,
            bytes,
        })
    }
}

/// UPLOAD_RESPONSE payload (Server → Client), empty body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadResponsePayload;

impl Payload for UploadResponsePayload {
    const MSG_TYPE: MsgType = MsgType::UploadResponse;

    fn encode(&self) -> Vec<u8> {
        Vec::new()
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if !data.is_empty() {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        Ok(Self)
    }
}
