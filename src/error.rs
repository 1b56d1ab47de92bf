//! Error types for the encode pipeline.

use thiserror::Error;

use crate::frame::FrameKey;

/// Session-level failure. One of these ends an encode pass.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// A backend rejected the frame; retrying cannot help.
    #[error("frame {key} unencodable: {message}")]
    Unencodable { key: FrameKey, message: String },

    /// Transient failures outlived the retry budget.
    #[error("frame {key} failed after {attempts} attempt(s): {message}")]
    RetriesExhausted {
        key: FrameKey,
        attempts: u32,
        message: String,
    },

    /// The package is missing frames at finish time.
    #[error(
        "incomplete output: expected {expected} frame(s), wrote {written}, {pending} still buffered"
    )]
    IncompleteOutput {
        expected: u64,
        written: u64,
        pending: usize,
    },

    /// Every worker has gone away while frames were outstanding.
    #[error("no encoders left to process outstanding frames")]
    NoEncoders,

    #[error("failed to decode frame {index}: {message}")]
    Decode { index: u64, message: String },

    #[error("package error: {0}")]
    Package(#[from] std::io::Error),

    #[error("playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("internal consistency error: {0}")]
    Internal(String),

    /// The queue was shut down while a frame was being submitted.
    #[error("encoding cancelled")]
    Cancelled,
}

impl EncodeError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EncodeError::Cancelled)
    }
}

/// Outcome of a single failed compression attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Network timeout, refused connection, server went away.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// The frame itself cannot be encoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("content '{id}' overlaps '{other}'")]
    Overlap { id: String, other: String },

    #[error("content '{0}' is already in the playlist")]
    DuplicateId(String),

    #[error("content '{0}' not found")]
    UnknownContent(String),

    #[error("content '{id}' has invalid trims: {reason}")]
    InvalidTrim { id: String, reason: String },
}
