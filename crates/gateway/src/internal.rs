// Internal control API: the private surface the REST service uses to drive
// broadcasts, activity, and subscription maintenance for its own mutations.

use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use banter_common::protocol::ws::ServerEvent;
use banter_common::types::{ChannelId, UserId, UserStatus};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ErrorCode, GatewayError};
use crate::GatewayState;

pub fn router(state: GatewayState) -> Router {
    let auth_layer = middleware::from_fn_with_state(state.clone(), require_internal_token);

    Router::new()
        .route("/internal/v1/events", post(publish_event))
        .route("/internal/v1/users/{user_id}/activity", post(record_activity))
        .route("/internal/v1/users/{user_id}/presence", get(presence_of))
        .route(
            "/internal/v1/users/{user_id}/channels/{channel_id}",
            put(add_channel).delete(remove_channel),
        )
        .route_layer(auth_layer)
        .with_state(state)
}

async fn require_internal_token(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token);

    match presented {
        Some(token) if token == state.internal_token.as_ref() => next.run(request).await,
        Some(_) => unauthorized_response("invalid internal token"),
        None => unauthorized_response("missing internal token"),
    }
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    GatewayError::new(ErrorCode::AuthInvalidToken, message).into_response()
}

#[derive(Debug, Deserialize)]
struct PublishEventRequest {
    channel_id: ChannelId,
    event: ServerEvent,
}

#[derive(Debug, Serialize)]
struct PublishEventResponse {
    delivered: usize,
}

/// Fan a fully-formed event out to a channel's live connections.
async fn publish_event(
    State(state): State<GatewayState>,
    Json(payload): Json<PublishEventRequest>,
) -> impl IntoResponse {
    let kind = payload.event.kind();
    let delivered = state.fanout.broadcast_to_channel(payload.event, payload.channel_id).await;
    debug!(channel_id = payload.channel_id, kind, delivered, "internal event published");
    (StatusCode::ACCEPTED, Json(PublishEventResponse { delivered }))
}

/// Activity signalled by the REST service (message posted over HTTP, profile
/// fetched, and so on). A no-op for users with no live connections.
async fn record_activity(
    Path(user_id): Path<UserId>,
    State(state): State<GatewayState>,
) -> StatusCode {
    if let Some(status) = state.presence.record_activity(user_id).await {
        state.fanout.broadcast_status_change(user_id, status).await;
    }
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct PresenceResponse {
    user_id: UserId,
    status: UserStatus,
}

async fn presence_of(
    Path(user_id): Path<UserId>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    let status = state.presence.status_of(user_id).await;
    Json(PresenceResponse { user_id, status })
}

async fn add_channel(
    Path((user_id, channel_id)): Path<(UserId, ChannelId)>,
    State(state): State<GatewayState>,
) -> StatusCode {
    if !state.registry.add_channel(user_id, channel_id).await {
        debug!(user_id, channel_id, "add_channel for a user with no live connections, ignoring");
    }
    StatusCode::NO_CONTENT
}

async fn remove_channel(
    Path((user_id, channel_id)): Path<(UserId, ChannelId)>,
    State(state): State<GatewayState>,
) -> StatusCode {
    state.registry.remove_channel(user_id, channel_id).await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use banter_common::protocol::ws::ServerEvent;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use crate::config::GatewayConfig;
    use crate::directory::ChannelDirectory;
    use crate::hooks::RecordingObserver;
    use crate::registry::ConnectionLimits;
    use crate::store::MessageStore;
    use crate::{build_state, GatewayState};

    const TEST_SECRET: &str = "banter_test_secret_that_is_definitely_long_enough";
    const INTERNAL_TOKEN: &str = "banter_test_internal_token";
    const LIMITS: ConnectionLimits = ConnectionLimits { max_per_user: 5, max_total: 100 };

    fn memory_state() -> GatewayState {
        let config = GatewayConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: TEST_SECRET.to_string(),
            internal_token: INTERNAL_TOKEN.to_string(),
            database_url: None,
            max_connections_per_user: 5,
            max_total_connections: 100,
            away_timeout: Duration::from_secs(300),
            away_check_interval: Duration::from_secs(30),
            log_filter: "info".to_string(),
        };
        let (observer, _departures) = RecordingObserver::new();
        build_state(&config, ChannelDirectory::memory(), MessageStore::memory(), vec![observer])
            .expect("state should build")
    }

    fn app(state: GatewayState) -> Router {
        super::router(state)
    }

    fn authed(builder: axum::http::request::Builder) -> axum::http::request::Builder {
        builder.header(AUTHORIZATION, format!("Bearer {INTERNAL_TOKEN}"))
    }

    async fn read_json(response: axum::response::Response) -> serde_json::Value {
        let bytes =
            to_bytes(response.into_body(), usize::MAX).await.expect("response body should read");
        serde_json::from_slice(&bytes).expect("response body should be JSON")
    }

    // ── authentication ───────────────────────────────────────────────

    #[tokio::test]
    async fn rejects_requests_without_internal_token() {
        let response = app(memory_state())
            .oneshot(
                Request::builder()
                    .uri("/internal/v1/users/7/presence")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_requests_with_wrong_internal_token() {
        let response = app(memory_state())
            .oneshot(
                Request::builder()
                    .uri("/internal/v1/users/7/presence")
                    .header(AUTHORIZATION, "Bearer not-the-token")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // ── event publication ────────────────────────────────────────────

    #[tokio::test]
    async fn published_events_reach_subscribed_connections() {
        let state = memory_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.registry.connect(1, vec![10], tx, LIMITS).await.expect("should admit");

        let body = json!({
            "channel_id": 10,
            "event": { "type": "member_left", "channel_id": 10, "user_id": 3 },
        });
        let response = app(state)
            .oneshot(
                authed(Request::builder().method(Method::POST).uri("/internal/v1/events"))
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(read_json(response).await, json!({ "delivered": 1 }));
        assert_eq!(
            rx.try_recv().expect("event should be delivered"),
            ServerEvent::MemberLeft { channel_id: 10, user_id: 3 }
        );
    }

    #[tokio::test]
    async fn publishing_to_an_empty_channel_reports_zero_deliveries() {
        let body = json!({
            "channel_id": 42,
            "event": { "type": "privacy_updated", "channel_id": 42, "is_private": true },
        });
        let response = app(memory_state())
            .oneshot(
                authed(Request::builder().method(Method::POST).uri("/internal/v1/events"))
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(read_json(response).await, json!({ "delivered": 0 }));
    }

    // ── activity & presence ──────────────────────────────────────────

    #[tokio::test]
    async fn activity_flips_an_away_user_back_online() {
        tokio::time::pause();
        let state = memory_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.registry.connect(1, vec![10], tx, LIMITS).await.expect("should admit");
        state.presence.mark_online(1).await;
        tokio::time::advance(Duration::from_secs(300)).await;
        state.presence.check_away(1).await.expect("user should be away");

        let response = app(state.clone())
            .oneshot(
                authed(Request::builder().method(Method::POST).uri("/internal/v1/users/1/activity"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            rx.try_recv().expect("flip should be announced"),
            ServerEvent::UserStatusChange {
                user_id: 1,
                status: banter_common::types::UserStatus::Online
            }
        );
    }

    #[tokio::test]
    async fn activity_for_a_disconnected_user_is_accepted_and_ignored() {
        let response = app(memory_state())
            .oneshot(
                authed(Request::builder().method(Method::POST).uri("/internal/v1/users/9/activity"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn presence_endpoint_reports_the_live_status() {
        let state = memory_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        state.registry.connect(1, vec![10], tx, LIMITS).await.expect("should admit");
        state.presence.mark_online(1).await;

        let online = app(state.clone())
            .oneshot(
                authed(Request::builder().uri("/internal/v1/users/1/presence"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");
        assert_eq!(online.status(), StatusCode::OK);
        assert_eq!(read_json(online).await, json!({ "user_id": 1, "status": "online" }));

        let offline = app(state)
            .oneshot(
                authed(Request::builder().uri("/internal/v1/users/2/presence"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");
        assert_eq!(offline.status(), StatusCode::OK);
        assert_eq!(read_json(offline).await, json!({ "user_id": 2, "status": "offline" }));
    }

    // ── subscription maintenance ─────────────────────────────────────

    #[tokio::test]
    async fn channel_grants_apply_to_live_connections() {
        let state = memory_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        state.registry.connect(1, vec![10], tx, LIMITS).await.expect("should admit");

        let granted = app(state.clone())
            .oneshot(
                authed(Request::builder().method(Method::PUT).uri("/internal/v1/users/1/channels/11"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");
        assert_eq!(granted.status(), StatusCode::NO_CONTENT);
        assert!(state.registry.is_subscribed(1, 11).await);

        let revoked = app(state.clone())
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::DELETE)
                        .uri("/internal/v1/users/1/channels/11"),
                )
                .body(Body::empty())
                .expect("request should build"),
            )
            .await
            .expect("request should return a response");
        assert_eq!(revoked.status(), StatusCode::NO_CONTENT);
        assert!(!state.registry.is_subscribed(1, 11).await);
    }

    #[tokio::test]
    async fn channel_grant_for_a_disconnected_user_is_a_no_op() {
        let state = memory_state();

        let response = app(state.clone())
            .oneshot(
                authed(Request::builder().method(Method::PUT).uri("/internal/v1/users/5/channels/11"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!state.registry.is_subscribed(5, 11).await);
    }
}
