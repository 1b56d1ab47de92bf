//! Compression backends: anything that turns a decoded picture into
//! compressed bytes.
//!
//! A worker picks its backend once, when it is spawned, through a
//! [`BackendProvider`]; the choice is never revisited per frame.

pub mod local;
pub mod remote;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::ServerDescription;
use crate::error::BackendError;
use crate::frame::{CompressedFrame, FrameUnit};

pub use local::{LocalEncoder, encode_picture};
pub use remote::RemoteEncoder;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PictureFormat {
    #[default]
    Jpeg,
    Png,
}

impl PictureFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            PictureFormat::Jpeg => "jpeg",
            PictureFormat::Png => "png",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSettings {
    #[serde(default)]
    pub format: PictureFormat,
    #[serde(default = "default_quality")]
    pub quality: u8,
}

fn default_quality() -> u8 {
    90
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            format: PictureFormat::default(),
            quality: default_quality(),
        }
    }
}

pub trait CompressionBackend: Send {
    /// Label used in logs and metrics.
    fn name(&self) -> &str;

    fn compress(&mut self, frame: &FrameUnit) -> Result<CompressedFrame, BackendError>;

    /// Health check; local backends are always reachable.
    fn is_reachable(&self) -> bool {
        true
    }
}

/// Builds the backend a new worker will use for its whole life.
pub trait BackendProvider: Send + Sync {
    fn local(&self, thread: usize) -> Box<dyn CompressionBackend>;

    fn remote(&self, server: &ServerDescription) -> Box<dyn CompressionBackend>;
}

/// The production pairing: in-process codec and network encode servers.
#[derive(Debug, Clone)]
pub struct StandardBackends {
    codec: CodecSettings,
    remote_timeout: Duration,
}

impl StandardBackends {
    pub fn new(codec: CodecSettings, remote_timeout: Duration) -> Self {
        Self {
            codec,
            remote_timeout,
        }
    }
}

impl BackendProvider for StandardBackends {
    fn local(&self, thread: usize) -> Box<dyn CompressionBackend> {
        Box::new(LocalEncoder::new(thread, self.codec))
    }

    fn remote(&self, server: &ServerDescription) -> Box<dyn CompressionBackend> {
        Box::new(RemoteEncoder::new(
            server.clone(),
            self.codec,
            self.remote_timeout,
        ))
    }
}
