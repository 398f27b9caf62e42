//! Per-connection session loop.
//!
//! A session moves through `Connecting -> Authenticating -> Open -> Closed`.
//! Authentication happens exactly once, from the handshake header. While
//! open, frames are handled strictly one at a time. A frame that fails to
//! decode or predict gets an error reply and the session stays open; a
//! malformed message or a panic ends it.

use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message};
use axum::http::HeaderValue;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use uuid::Uuid;
use wildlens_common::{close_code, StreamFrame, StreamReply};

use super::STREAM_ROUTE;
use crate::error::error_chain;
use crate::imaging::ImageFrame;
use crate::metrics::{FailureKind, Outcome, RequestEvent, Transport};
use crate::prediction::PredictionService;
use crate::AppState;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    AuthFailed,
    ProtocolViolation,
    Unexpected,
    ClientClosed,
    Disconnected,
    Transport,
    IdleTimeout,
}

impl CloseReason {
    /// Close code the gateway sends, if it is the side closing.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            CloseReason::AuthFailed | CloseReason::ProtocolViolation => {
                Some(close_code::POLICY_VIOLATION)
            }
            CloseReason::Unexpected => Some(close_code::INTERNAL_ERROR),
            CloseReason::IdleTimeout => Some(close_code::NORMAL),
            CloseReason::ClientClosed | CloseReason::Disconnected | CloseReason::Transport => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::AuthFailed => "authentication failed",
            CloseReason::ProtocolViolation => "protocol violation",
            CloseReason::Unexpected => "unexpected error",
            CloseReason::ClientClosed => "client closed",
            CloseReason::Disconnected => "disconnected",
            CloseReason::Transport => "transport error",
            CloseReason::IdleTimeout => "idle timeout",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Open,
    Closed(CloseReason),
}

/// A message that breaks the stream protocol. Ends the session.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("Message is not valid JSON")]
    NotJson(#[source] serde_json::Error),

    #[error("Message must be a JSON object")]
    NotObject,

    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Missing '{0}' field")]
    MissingField(&'static str),

    #[error("Binary messages are not supported")]
    BinaryMessage,
}

/// Parse an inbound text message into `(filename, base64 data)`.
fn parse_frame(text: &str) -> Result<(String, String), ProtocolViolation> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(ProtocolViolation::NotJson)?;
    if !value.is_object() {
        return Err(ProtocolViolation::NotObject);
    }

    let frame: StreamFrame = serde_json::from_value(value).map_err(ProtocolViolation::Malformed)?;
    let filename = frame
        .filename
        .ok_or(ProtocolViolation::MissingField("filename"))?;
    let data = frame.data.ok_or(ProtocolViolation::MissingField("data"))?;
    Ok((filename, data))
}

enum FrameResult {
    /// Answer and keep the session open.
    Reply(StreamReply, Outcome),
    /// Answer with an error and close.
    Violation(ProtocolViolation),
}

async fn process_frame(text: &str, predictions: &PredictionService) -> FrameResult {
    let (filename, data) = match parse_frame(text) {
        Ok(parts) => parts,
        Err(violation) => return FrameResult::Violation(violation),
    };

    let payload = match STANDARD.decode(data.as_bytes()) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Invalid base64 data for {}: {}", filename, e);
            return FrameResult::Reply(
                StreamReply::error(format!("Invalid base64 data for {}", filename)),
                Outcome::Failure(FailureKind::Decode),
            );
        }
    };

    let frame = ImageFrame::new(payload).with_filename(filename);
    match predictions.predict_binary(&frame).await {
        Ok(predictions) => FrameResult::Reply(
            StreamReply::Predictions { predictions },
            Outcome::Success,
        ),
        Err(e) => {
            tracing::warn!("Stream prediction failed: {}", error_chain(&e));
            let kind = if e.is_decode() {
                FailureKind::Decode
            } else {
                FailureKind::Inference
            };
            FrameResult::Reply(StreamReply::error(e.to_string()), Outcome::Failure(kind))
        }
    }
}

/// One persistent-stream connection.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    peer: Option<SocketAddr>,
    authorization: Option<HeaderValue>,
    authenticated: bool,
    connected_at: DateTime<Utc>,
    started: Instant,
    frames_processed: u64,
    state: SessionState,
}

impl Session {
    pub fn new(peer: Option<SocketAddr>, authorization: Option<HeaderValue>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            authorization,
            authenticated: false,
            connected_at: Utc::now(),
            started: Instant::now(),
            frames_processed: 0,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(session = %self.id, "{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn peer_label(&self) -> String {
        self.peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown peer".to_string())
    }

    /// Drive the session until it closes. Returns the close reason.
    pub async fn run<S, R>(&mut self, state: &AppState, sink: &mut S, stream: &mut R) -> CloseReason
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
        R: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        if let SessionState::Closed(reason) = self.state {
            return reason;
        }

        tracing::info!(session = %self.id, "Stream session accepted from {}", self.peer_label());
        self.transition(SessionState::Authenticating);

        if let Err(e) = state.gate.authenticate_header(self.authorization.as_ref()) {
            tracing::warn!(
                session = %self.id,
                "Stream authentication failed from {}: {}",
                self.peer_label(),
                e.reason()
            );
            state.observe(RequestEvent::new(
                Transport::Stream,
                STREAM_ROUTE,
                Outcome::Failure(FailureKind::Auth),
            ));
            send_reply(sink, &StreamReply::error(e.to_string())).await;
            return self.close(sink, CloseReason::AuthFailed).await;
        }

        self.authenticated = true;
        tracing::info!(session = %self.id, "Stream session authenticated");
        self.transition(SessionState::Open);

        let idle_timeout = state.config.stream.idle_timeout();
        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => return self.close(sink, CloseReason::IdleTimeout).await,
                },
                None => stream.next().await,
            };

            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(_))) => {
                    return self
                        .reject(sink, state, ProtocolViolation::BinaryMessage)
                        .await;
                }
                Some(Ok(Message::Close(_))) => {
                    return self.close(sink, CloseReason::ClientClosed).await;
                }
                Some(Ok(_)) => continue, // ping/pong
                Some(Err(e)) => {
                    tracing::debug!(session = %self.id, "WebSocket error: {}", e);
                    return self.close(sink, CloseReason::Transport).await;
                }
                None => return self.close(sink, CloseReason::Disconnected).await,
            };

            let result = AssertUnwindSafe(process_frame(&text, &state.predictions))
                .catch_unwind()
                .await;

            match result {
                Ok(FrameResult::Reply(reply, outcome)) => {
                    self.frames_processed += 1;
                    state.observe(RequestEvent::new(Transport::Stream, STREAM_ROUTE, outcome));
                    if !send_reply(sink, &reply).await {
                        return self.close(sink, CloseReason::Transport).await;
                    }
                }
                Ok(FrameResult::Violation(violation)) => {
                    return self.reject(sink, state, violation).await;
                }
                Err(panic) => {
                    tracing::error!(
                        session = %self.id,
                        "Panic while processing stream frame: {}",
                        panic_message(&*panic)
                    );
                    state.observe(RequestEvent::new(
                        Transport::Stream,
                        STREAM_ROUTE,
                        Outcome::Failure(FailureKind::Unexpected),
                    ));
                    return self.close(sink, CloseReason::Unexpected).await;
                }
            }
        }
    }

    async fn reject<S>(
        &mut self,
        sink: &mut S,
        state: &AppState,
        violation: ProtocolViolation,
    ) -> CloseReason
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        tracing::info!(session = %self.id, "Protocol violation: {}", error_chain(&violation));
        state.observe(RequestEvent::new(
            Transport::Stream,
            STREAM_ROUTE,
            Outcome::Failure(FailureKind::Protocol),
        ));
        send_reply(sink, &StreamReply::error(violation.to_string())).await;
        self.close(sink, CloseReason::ProtocolViolation).await
    }

    async fn close<S>(&mut self, sink: &mut S, reason: CloseReason) -> CloseReason
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        if let Some(code) = reason.close_code() {
            let frame = CloseFrame {
                code,
                reason: reason.as_str().into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                tracing::debug!(session = %self.id, "Failed to send close frame: {}", e);
            }
        }

        self.transition(SessionState::Closed(reason));
        tracing::info!(
            session = %self.id,
            reason = %reason,
            frames = self.frames_processed,
            connected_at = %self.connected_at.to_rfc3339(),
            duration_ms = self.started.elapsed().as_millis() as u64,
            "Stream session closed"
        );
        reason
    }
}

/// Send a reply. Returns false if the connection is gone.
async fn send_reply<S>(sink: &mut S, reply: &StreamReply) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let json = match serde_json::to_string(reply) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize stream reply: {}", e);
            return false;
        }
    };

    match sink.send(Message::Text(json)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Failed to send stream reply: {}", e);
            false
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "non-string panic payload".to_string()
    }
}
