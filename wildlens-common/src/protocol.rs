//! WebSocket protocol types for the streaming prediction endpoint.
//!
//! # Protocol Overview
//!
//! Messages are JSON text frames.
//!
//! ## Connection Flow
//!
//! 1. Client connects to `/predictions/ws` with `Authorization: Key <secret>`
//! 2. Gateway validates the credential; on failure it sends one `Error`
//!    reply and closes with [`close_code::POLICY_VIOLATION`]
//! 3. Client sends `StreamFrame` messages, one image each
//! 4. Gateway answers every frame, in order, with either `Predictions` or
//!    `Error`; a failed frame does not end the session
//! 5. A frame missing `filename` or `data` is a protocol violation: the
//!    gateway sends `Error` and closes with [`close_code::POLICY_VIOLATION`]

use serde::{Deserialize, Serialize};

/// Close codes used by the gateway (RFC 6455 section 7.4.1).
pub mod close_code {
    /// Normal closure (idle timeout, server shutdown).
    pub const NORMAL: u16 = 1000;
    /// Authentication failure or malformed message.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Unexpected failure while processing a frame.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Inbound frame: one image, base64-encoded.
///
/// Both fields are optional at the type level so that a missing field can be
/// told apart from invalid JSON and reported as a protocol violation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl StreamFrame {
    pub fn new(filename: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            data: Some(data.into()),
        }
    }
}

/// Outbound reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamReply {
    Predictions { predictions: Vec<f32> },
    Error { error: String },
}

impl StreamReply {
    pub fn error(message: impl Into<String>) -> Self {
        StreamReply::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StreamReply::Error { .. })
    }
}
