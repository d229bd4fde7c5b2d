// Frame codec for the socket serving loop.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use banter_common::protocol::ws::{ClientFrame, ServerEvent};
use tracing::debug;

use crate::metrics;

/// Close codes sent by the gateway (RFC 6455 §7.4.1).
pub const CLOSE_POLICY_VIOLATION: u16 = close_code::POLICY;
pub const CLOSE_INTERNAL_ERROR: u16 = close_code::ERROR;
pub const CLOSE_TRY_AGAIN_LATER: u16 = close_code::AGAIN;

/// Decode an inbound text frame. Undecodable input is a silent drop; the
/// connection stays open.
pub fn decode_frame(raw: &str) -> Option<ClientFrame> {
    match serde_json::from_str(raw) {
        Ok(frame) => Some(frame),
        Err(error) => {
            metrics::increment_frames_dropped("parse");
            debug!(error = %error, "undecodable client frame, dropping");
            None
        }
    }
}

pub fn encode_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_event(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

/// Best-effort close with an application code; the peer may already be gone.
pub async fn close_socket(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
}
