//! ERROR message payload

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::constants::{ErrorCode, MsgType};
use crate::error::{ProtocolError, Result};
use crate::messages::Payload;

/// ERROR payload (Server → Client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Error classification
    pub code: ErrorCode,
    /// Human-readable detail
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Payload for ErrorPayload {
    const MSG_TYPE: MsgType = MsgType::Error;

    fn encode(&self) -> Vec<u8> {
        let msg = self.message.as_bytes();
        let mut buf = Vec::with_capacity(8 + msg.len());
        buf.write_u32::<LittleEndian>(self.code.to_u32()).unwrap();
        buf.write_u32::<LittleEndian>(msg.len() as u32).unwrap();
        buf.write_all(msg).unwrap();
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut cursor = Cursor::new(data);
        let code_raw = cursor.read_u32::<LittleEndian>()?;
        // Unknown codes collapse to Internal so newer servers stay readable
        let code = ErrorCode::from_u32(code_raw).unwrap_or(ErrorCode::Internal);
        let msg_len = cursor.read_u32::<LittleEndian>()? as usize;
        if data.len() != 8 + msg_len {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut msg = vec![0u8; msg_len];
        cursor.read_exact(&mut msg)?;
        let message = String::from_utf8_lossy(&msg).into_owned();
        Ok(Self { code, message })
    }
}
