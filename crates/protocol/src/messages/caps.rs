//! CAPS_REQUEST and CAPS_RESPONSE message payloads

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::constants::MsgType;
use crate::error::{ProtocolError, Result};
use crate::messages::Payload;

/// CAPS_REQUEST payload (Client → Server), empty body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapsRequestPayload;

impl Payload for CapsRequestPayload {
    const MSG_TYPE: MsgType = MsgType::CapsRequest;

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

/// CAPS_RESPONSE payload (Server → Client)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapsResponsePayload {
    /// Bitmask of supported commands, see [`crate::caps`]
    pub mask: u64,
}

impl CapsResponsePayload {
    pub fn supports(&self, bit: u64) -> bool {
        self.mask & bit != 0
    }
}

impl Payload for CapsResponsePayload {
    const MSG_TYPE: MsgType = MsgType::CapsResponse;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.write_u64::<LittleEndian>(self.mask).unwrap();
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != 8 {
            return Err(ProtocolError::InvalidPayloadLength);
        }
        let mut cursor = Cursor::new(data);
        let mask = cursor.read_u64::<LittleEndian>()?;
        Ok(Self { mask })
    }
}
