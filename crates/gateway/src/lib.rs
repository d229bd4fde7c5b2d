// banter-gateway: real-time WebSocket gateway for the Banter chat backend.

pub mod auth;
pub mod config;
pub mod db;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod hooks;
pub mod internal;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod store;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::directory::ChannelDirectory;
use crate::dispatch::EventDispatcher;
use crate::fanout::BroadcastFanout;
use crate::hooks::{DisconnectHooks, DisconnectObserver};
use crate::presence::PresenceTracker;
use crate::registry::{ConnectionLimits, ConnectionRegistry};
use crate::store::MessageStore;

/// Shared handles threaded through every route.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub fanout: Arc<BroadcastFanout>,
    pub dispatcher: Arc<EventDispatcher>,
    pub directory: ChannelDirectory,
    pub verifier: Arc<TokenVerifier>,
    pub limits: ConnectionLimits,
    pub away_check_interval: Duration,
    pub internal_token: Arc<str>,
}

/// Wire the connection engine together. Must run inside a Tokio runtime;
/// starting the disconnect hook worker spawns a task.
pub fn build_state(
    config: &GatewayConfig,
    directory: ChannelDirectory,
    store: MessageStore,
    observers: Vec<Arc<dyn DisconnectObserver>>,
) -> anyhow::Result<GatewayState> {
    let verifier =
        Arc::new(TokenVerifier::new(&config.jwt_secret).context("invalid gateway JWT secret")?);
    let registry = Arc::new(ConnectionRegistry::new());
    let presence = Arc::new(PresenceTracker::new(Arc::clone(&registry), config.away_timeout));
    let hooks = Arc::new(DisconnectHooks::start(observers));
    let fanout =
        Arc::new(BroadcastFanout::new(Arc::clone(&registry), Arc::clone(&presence), hooks));
    let dispatcher = Arc::new(EventDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&presence),
        Arc::clone(&fanout),
        store,
    ));

    Ok(GatewayState {
        registry,
        presence,
        fanout,
        dispatcher,
        directory,
        verifier,
        limits: ConnectionLimits {
            max_per_user: config.max_connections_per_user,
            max_total: config.max_total_connections,
        },
        away_check_interval: config.away_check_interval,
        internal_token: Arc::from(config.internal_token.as_str()),
    })
}
