//! Message payload types

mod alloc;
mod caps;
mod download;
mod error_msg;
mod free;
mod mul_mat_id;
mod upload;

pub use alloc::{AllocRequestPayload, AllocResponsePayload};
pub use caps::{CapsRequestPayload, CapsResponsePayload};
pub use download::{DownloadRequestPayload, DownloadResponsePayload};
pub use error_msg::ErrorPayload;
pub use free::{FreeRequestPayload, FreeResponsePayload};
pub use mul_mat_id::{ActivationRef, MulMatIdRequestPayload, MulMatIdResponsePayload};
pub use upload::{UploadRequestPayload, UploadResponsePayload};

use crate::constants::MsgType;
use crate::error::Result;
use crate::frame::Frame;

/// Trait for message payloads that can be encoded/decoded
pub trait Payload: Sized {
    /// The message type for this payload
    const MSG_TYPE: MsgType;

    /// Encode the payload to bytes
    fn encode(&self) -> Vec<u8>;

    /// Decode the payload from bytes
    fn decode(data: &[u8]) -> Result<Self>;

    /// Wrap this payload into a wire frame
    fn into_frame(self) -> Frame {
        Frame::new(Self::MSG_TYPE, self.encode())
    }
}

/// A parsed frame with its typed payload
#[derive(Debug, Clone)]
pub enum Message {
    AllocRequest(AllocRequestPayload),
    AllocResponse(AllocResponsePayload),
    FreeRequest(FreeRequestPayload),
    FreeResponse(FreeResponsePayload),
    UploadRequest(UploadRequestPayload),
    UploadResponse(UploadResponsePayload),
    DownloadRequest(DownloadRequestPayload),
    DownloadResponse(DownloadResponsePayload),
    MulMatIdRequest(MulMatIdRequestPayload),
    MulMatIdResponse(MulMatIdResponsePayload),
    CapsRequest(CapsRequestPayload),
    CapsResponse(CapsResponsePayload),
    Error(ErrorPayload),
}

impl Message {
    /// Parse a frame into a typed message
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let payload = &frame.payload;
        Ok(match frame.msg_type {
            MsgType::AllocRequest => Message::AllocRequest(AllocRequestPayload::decode(payload)?),
            MsgType::AllocResponse => Message::AllocResponse(AllocResponsePayload::decode(payload)?),
            MsgType::FreeRequest => Message::FreeRequest(FreeRequestPayload::decode(payload)?),
            MsgType::FreeResponse => Message::FreeResponse(FreeResponsePayload::decode(payload)?),
            MsgType::UploadRequest => Message::UploadRequest(UploadRequestPayload::decode(payload)?),
            MsgType::UploadResponse => {
                Message::UploadResponse(UploadResponsePayload::decode(payload)?)
            }
            MsgType::DownloadRequest => {
                Message::DownloadRequest(DownloadRequestPayload::decode(payload)?)
            }
            MsgType::DownloadResponse => {
                Message::DownloadResponse(DownloadResponsePayload::decode(payload)?)
            }
            MsgType::MulMatIdRequest => {
                Message::MulMatIdRequest(MulMatIdRequestPayload::decode(payload)?)
            }
            MsgType::MulMatIdResponse => {
                Message::MulMatIdResponse(MulMatIdResponsePayload::decode(payload)?)
            }
            MsgType::CapsRequest => Message::CapsRequest(CapsRequestPayload::decode(payload)?),
            MsgType::CapsResponse => Message::CapsResponse(CapsResponsePayload::decode(payload)?),
            MsgType::Error => Message::Error(ErrorPayload::decode(payload)?),
        })
    }

    /// Encode this message into a frame
    pub fn into_frame(self) -> Frame {
        match self {
            Message::AllocRequest(p) => p.into_frame(),
            Message::AllocResponse(p) => p.into_frame(),
            Message::FreeRequest(p) => p.into_frame(),
            Message::FreeResponse(p) => p.into_frame(),
            Message::UploadRequest(p) => p.into_frame(),
            Message::UploadResponse(p) => p.into_frame(),
            Message::DownloadRequest(p) => p.into_frame(),
            Message::DownloadResponse(p) => p.into_frame(),
            Message::MulMatIdRequest(p) => p.into_frame(),
            Message::MulMatIdResponse(p) => p.into_frame(),
            Message::CapsRequest(p) => p.into_frame(),
            Message::CapsResponse(p) => p.into_frame(),
            Message::Error(p) => p.into_frame(),
        }
    }
}
