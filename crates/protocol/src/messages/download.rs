//! DOWNLOAD_REQUEST and DOWNLOAD_RESPONSE message payloads
//!
//! Reads bytes back from a remote buffer. The dispatcher uses this on the
//! gather fallback path to reconstitute a full weight tensor locally when a
//! server cannot compute partial matmuls.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::constants::MsgType;
use crate::error::{ProtocolError, Result};
use crate::messages::Payload;

/// DOWNLOAD_REQUEST payload (Client → Server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadRequestPayload {
    /// Source buffer handle
    pub handle: u64,
    /// Byte offset within the buffer
    pub offset: u64,
    /// Number of bytes to read
    pub nbytes: u64,
}

impl Payload for DownloadRequestPayload {
    const MSG_TYPE: MsgType = MsgType::DownloadRequest;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24);
        buf.write_u64::<LittleEndian>(self.handle).unwrap();
        buf.write_u64::<LittleEndian>(self.offset).unwrap();
        buf.write_u64::<LittleEndian>(self.nbytes).unwrap();
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != 24 {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut cursor = Cursor::new(data);
        let handle = cursor.read_u64::<LittleEndian>()?;
        let offset = cursor.read_u64::<LittleEndian>()?;
        let nbytes = cursor.read_u64::<LittleEndian>()?;
        Ok(Self {
            handle,
            offset,
            nbytes,
        })
    }
}

/// DOWNLOAD_RESPONSE payload (Server → Client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResponsePayload {
    /// Buffer contents at the requested range
    pub bytes: Vec<u8>,
}

impl Payload for DownloadResponsePayload {
    const MSG_TYPE: MsgType = MsgType::DownloadResponse;

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
