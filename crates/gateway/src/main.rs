// banter-gatewayd: gateway server entry point.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use banter_gateway::config::GatewayConfig;
use banter_gateway::directory::ChannelDirectory;
use banter_gateway::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
};
use banter_gateway::hooks::LoggingObserver;
use banter_gateway::metrics::{self, GatewayMetrics};
use banter_gateway::store::MessageStore;
use banter_gateway::{build_state, db, internal, ws, GatewayState};

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .init();

    if config.is_dev_jwt_secret() {
        warn!("BANTER_GATEWAY_JWT_SECRET is unset, using the development placeholder");
    }
    if config.is_dev_internal_token() {
        warn!("BANTER_GATEWAY_INTERNAL_TOKEN is unset, using the development placeholder");
    }

    metrics::set_global_metrics(Arc::new(GatewayMetrics::default()));

    let (directory, store) = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = db::create_pg_pool(database_url, db::PoolConfig::from_env())
                .await
                .context("failed to create gateway database pool")?;
            db::check_pool_health(&pool).await.context("gateway database health check failed")?;
            (ChannelDirectory::Postgres(pool.clone()), MessageStore::Postgres(pool))
        }
        None => {
            warn!("BANTER_GATEWAY_DATABASE_URL is unset, using in-memory stores");
            (ChannelDirectory::memory(), MessageStore::memory())
        }
    };

    let state = build_state(&config, directory, store, vec![Arc::new(LoggingObserver)])
        .context("failed to build gateway state")?;
    let app = build_router(state);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting gateway server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited unexpectedly")
}

fn build_router(state: GatewayState) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(metrics_endpoint))
            .merge(ws::router(state.clone()))
            .merge(internal::router(state)),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn metrics_endpoint() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], metrics::render_global())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response =
        with_request_id_scope(request_id.clone(), async move { next.run(request).await }).await;

    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    metrics::record_http_request(method.as_str(), &path, response.status().as_u16(), latency_ms);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}
