//! HTTP contract between [`RemoteEncoder`](crate::backend::RemoteEncoder)
//! and [`EncodeServer`](crate::server::EncodeServer).
//!
//! | Method | Path      | Request body  | Reply body                 |
//! |--------|-----------|---------------|----------------------------|
//! | GET    | `/ping`   | none          | [`PingReply`] JSON         |
//! | POST   | `/encode` | RGB24 picture | compressed frame           |
//!
//! The [`EncodeRequest`] travels JSON-encoded in the `X-Dcp-Frame` header.
//! Failures carry an [`ErrorReply`] body; a picture the codec refuses is
//! answered with `422`, anything else non-2xx is a server fault.

use serde::{Deserialize, Serialize};

use crate::backend::CodecSettings;
use crate::frame::{Eyes, FrameUnit};

pub const PROTOCOL_VERSION: u32 = 1;

pub const PING_PATH: &str = "/ping";
pub const ENCODE_PATH: &str = "/encode";

pub const FRAME_HEADER: &str = "X-Dcp-Frame";
pub const ENCODE_MS_HEADER: &str = "X-Dcp-Encode-Ms";

pub const STATUS_CODEC_ERROR: u16 = 422;

/// Largest picture a server accepts: 4096x2160 RGB24 with room to spare.
pub const MAX_PICTURE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    /// The picture itself cannot be encoded; retrying will not help.
    CodecError,
    /// Anything else that went wrong on the server.
    Error,
}

impl ReplyStatus {
    pub fn from_http(status: u16) -> Self {
        match status {
            200..=299 => ReplyStatus::Ok,
            STATUS_CODEC_ERROR => ReplyStatus::CodecError,
            _ => ReplyStatus::Error,
        }
    }
}

/// Describes the picture in the body of an encode request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeRequest {
    pub version: u32,
    pub index: u64,
    pub eyes: Eyes,
    pub width: u32,
    pub height: u32,
    pub codec: CodecSettings,
}

impl EncodeRequest {
    pub fn for_frame(frame: &FrameUnit, codec: CodecSettings) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            index: frame.index,
            eyes: frame.eyes,
            width: frame.image.width,
            height: frame.image.height,
            codec,
        }
    }

    pub fn to_header(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_header(value: &str) -> Result<Self, String> {
        let request: Self = serde_json::from_str(value)
            .map_err(|err| format!("malformed {FRAME_HEADER} header: {err}"))?;
        if request.version != PROTOCOL_VERSION {
            return Err(format!(
                "protocol version {} is not supported (expected {PROTOCOL_VERSION})",
                request.version
            ));
        }
        Ok(request)
    }

    /// Bytes of RGB24 data the header promises, if that fits the server's limit.
    pub fn picture_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(3)
            .filter(|len| *len <= MAX_PICTURE_BYTES)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingReply {
    pub threads: u32,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub message: String,
}
