//! WebSocket endpoint for streamed predictions.

mod session;

pub use session::{CloseReason, ProtocolViolation, Session, SessionState};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
    routing::get,
    Router,
};
use futures_util::StreamExt;

use crate::AppState;

/// Route served by the session manager.
pub const STREAM_ROUTE: &str = "/predictions/ws";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(STREAM_ROUTE, get(ws_handler))
}

/// WebSocket upgrade handler.
///
/// The upgrade is always accepted; the credential from the handshake is
/// checked by the session itself so a rejected caller gets an error message
/// and a close code instead of a bare HTTP 401.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let authorization = headers.get(AUTHORIZATION).cloned();

    ws.on_upgrade(move |socket| async move {
        let (mut sink, mut stream) = socket.split();
        let mut session = Session::new(peer, authorization);
        session.run(&state, &mut sink, &mut stream).await;
    })
}
