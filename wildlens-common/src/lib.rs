//! WildLens Common Types
//!
//! Shared types used by the prediction gateway and its clients.

pub mod prediction;
pub mod protocol;

pub use prediction::{ErrorDetail, PredictionKind, PredictionResponse};
pub use protocol::{close_code, StreamFrame, StreamReply};
