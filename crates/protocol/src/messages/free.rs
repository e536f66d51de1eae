//! FREE_REQUEST and FREE_RESPONSE message payloads

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::constants::MsgType;
use crate::error::{ProtocolError, Result};
use crate::messages::Payload;

/// FREE_REQUEST payload (Client → Server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRequestPayload {
    /// Handle returned by a previous ALLOC
    pub handle: u64,
}

impl Payload for FreeRequestPayload {
    const MSG_TYPE: MsgType = MsgType::FreeRequest;

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

/// FREE_RESPONSE payload (Server → Client), empty body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeResponsePayload;

impl Payload for FreeResponsePayload {
    const MSG_TYPE: MsgType = MsgType::FreeResponse;

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_roundtrip() {
        let payload = FreeRequestPayload { handle: 42 };
        let decoded = FreeRequestPayload::decode(&payload.encode()).unwrap();
        assert_eq!(payload, decoded);

        let resp = FreeResponsePayload;
        assert!(resp.encode().is_empty());
        FreeResponsePayload::decode(&[]).unwrap();
    }
}
