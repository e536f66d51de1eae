//! Frame encoding/decoding
//!
//! Every message travels as one frame:
//!
//! ```text
//! magic(4) | version(2) | msg_type(2) | payload_len(4) | payload_crc(4) | payload
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::constants::{MsgType, MAGIC, PROTOCOL_VERSION};
use crate::error::{ProtocolError, Result};

/// Preamble size: magic(4) + version(2) + msg_type(2) + payload_len(4) + payload_crc(4)
const PREAMBLE_SIZE: usize = 16;

/// Upper bound on a single frame payload. Large tensor uploads are chunked
/// below this by the client, so anything bigger is a corrupt length field.
const MAX_PAYLOAD: usize = 1 << 30;

/// A complete wire frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Message type
    pub msg_type: MsgType,
    /// Payload bytes (can be empty)
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MsgType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    /// Encode the frame to bytes
    pub fn encode(&self) -> Vec<u8> {
        let payload_crc = crc32fast::hash(&self.payload);

        let mut buf = Vec::with_capacity(PREAMBLE_SIZE + self.payload.len());
        buf.write_all(&MAGIC).unwrap();
        buf.write_u16::<LittleEndian>(PROTOCOL_VERSION).unwrap();
        buf.write_u16::<LittleEndian>(self.msg_type.to_u16()).unwrap();
        buf.write_u32::<LittleEndian>(self.payload.len() as u32).unwrap();
        buf.write_u32::<LittleEndian>(payload_crc).unwrap();
        buf.write_all(&self.payload).unwrap();

        buf
    }

    /// Decode a frame from a byte slice
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PREAMBLE_SIZE {
            return Err(ProtocolError::BufferTooShort {
                need: PREAMBLE_SIZE,
                have: data.len(),
            });
        }

        let mut cursor = Cursor::new(data);
        let (msg_type, payload_len, expected_crc) = Self::parse_preamble(&mut cursor)?;

        let total_needed = PREAMBLE_SIZE + payload_len;
        if data.len() < total_needed {
            return Err(ProtocolError::BufferTooShort {
                need: total_needed,
                have: data.len(),
            });
        }

        let payload = data[PREAMBLE_SIZE..total_needed].to_vec();
        Self::check_crc(&payload, expected_crc)?;

        Ok(Self { msg_type, payload })
    }

    /// Read one complete frame from a blocking stream
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut preamble = [0u8; PREAMBLE_SIZE];
        reader.read_exact(&mut preamble)?;

        let mut cursor = Cursor::new(&preamble[..]);
        let (msg_type, payload_len, expected_crc) = Self::parse_preamble(&mut cursor)?;

        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload)?;
        Self::check_crc(&payload, expected_crc)?;

        Ok(Self { msg_type, payload })
    }

    /// Write this frame to a blocking stream
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode())?;
        writer.flush()?;
        Ok(())
    }

    /// Get the total encoded size of this frame
    pub fn encoded_size(&self) -> usize {
        PREAMBLE_SIZE + self.payload.len()
    }

    fn parse_preamble(cursor: &mut Cursor<&[u8]>) -> Result<(MsgType, usize, u32)> {
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        let version = cursor.read_u16::<LittleEndian>()?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let msg_type_raw = cursor.read_u16::<LittleEndian>()?;
        let msg_type =
            MsgType::from_u16(msg_type_raw).ok_or(ProtocolError::UnknownMessageType(msg_type_raw))?;

        let payload_len = cursor.read_u32::<LittleEndian>()? as usize;
        if payload_len > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload_len,
                max: MAX_PAYLOAD,
            });
        }

        let payload_crc = cursor.read_u32::<LittleEndian>()?;
        Ok((msg_type, payload_len, payload_crc))
    }

    fn check_crc(payload: &[u8], expected: u32) -> Result<()> {
        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(ProtocolError::PayloadCrcMismatch {
                expected,
                got: actual,
            });
        }
        Ok(())
    }
}
