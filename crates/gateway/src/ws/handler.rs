// Per-connection serving: authenticate, admit, pump frames until the socket
// goes away, then clean up.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::protocol;
use crate::dispatch::ConnectionContext;
use crate::metrics;
use crate::GatewayState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

pub async fn ws_upgrade(
    Query(query): Query<WsQuery>,
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, query.token, socket))
}

async fn handle_socket(state: GatewayState, token: Option<String>, mut socket: WebSocket) {
    let Some(token) = token else {
        metrics::increment_auth_failures();
        debug!("websocket connection without a token");
        protocol::close_socket(
            &mut socket,
            protocol::CLOSE_POLICY_VIOLATION,
            "missing access token",
        )
        .await;
        return;
    };

    let user_id = match state.verifier.verify(&token) {
        Ok(user_id) => user_id,
        Err(error) => {
            metrics::increment_auth_failures();
            debug!(error = %error, "websocket token rejected");
            protocol::close_socket(
                &mut socket,
                protocol::CLOSE_POLICY_VIOLATION,
                "invalid access token",
            )
            .await;
            return;
        }
    };

    let user = match state.directory.user_summary(user_id).await {
        Ok(Some(summary)) => summary,
        Ok(None) => {
            metrics::increment_auth_failures();
            warn!(user_id, "token subject has no user row");
            protocol::close_socket(&mut socket, protocol::CLOSE_POLICY_VIOLATION, "unknown user")
                .await;
            return;
        }
        Err(error) => {
            error!(user_id, error = %error, "user lookup failed");
            protocol::close_socket(&mut socket, protocol::CLOSE_INTERNAL_ERROR, "internal error")
                .await;
            return;
        }
    };

    let channels = match state.directory.channels_for_user(user_id).await {
        Ok(channels) => channels,
        Err(error) => {
            error!(user_id, error = %error, "channel lookup failed");
            protocol::close_socket(&mut socket, protocol::CLOSE_INTERNAL_ERROR, "internal error")
                .await;
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let connection_id =
        match state.registry.connect(user_id, channels, outbound_tx, state.limits).await {
            Ok(connection_id) => connection_id,
            Err(rejection) => {
                warn!(user_id, rejection = ?rejection, "connection rejected");
                protocol::close_socket(
                    &mut socket,
                    protocol::CLOSE_TRY_AGAIN_LATER,
                    rejection.close_reason(),
                )
                .await;
                return;
            }
        };
    info!(user_id, %connection_id, "connection admitted");

    if let Some(status) = state.presence.mark_online(user_id).await {
        state.fanout.broadcast_status_change(user_id, status).await;
    }

    let ctx = ConnectionContext { user_id, user };
    let mut away_interval = tokio::time::interval(state.away_check_interval);
    away_interval.reset(); // skip immediate first tick
    let mut fault = false;

    loop {
        tokio::select! {
            _ = away_interval.tick() => {
                if let Some(status) = state.presence.check_away(user_id).await {
                    state.fanout.broadcast_status_change(user_id, status).await;
                }
            }
            maybe_event = outbound_rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        if protocol::send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    // Sender dropped: the registry already pruned this connection.
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };
                match message {
                    Ok(Message::Text(raw)) => {
                        let Some(frame) = protocol::decode_frame(&raw) else {
                            continue;
                        };
                        if let Err(dispatch_error) = state.dispatcher.handle_frame(&ctx, frame).await {
                            error!(
                                user_id,
                                %connection_id,
                                error = %dispatch_error,
                                "frame dispatch failed, closing connection"
                            );
                            fault = true;
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    if fault {
        protocol::close_socket(&mut socket, protocol::CLOSE_INTERNAL_ERROR, "internal error")
            .await;
    }
    state.fanout.disconnect_and_cleanup(user_id, connection_id).await;
    info!(user_id, %connection_id, "connection closed");
}
