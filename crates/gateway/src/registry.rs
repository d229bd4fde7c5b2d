// Connection registry: which sockets each user holds and which channels
// their events route to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use banter_common::protocol::ws::ServerEvent;
use banter_common::types::{ChannelId, UserId};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::metrics;

pub type ConnectionId = Uuid;

/// Admission caps, checked global-first.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_per_user: usize,
    pub max_total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRejection {
    /// The process-wide connection cap is already held.
    GlobalLimit,
    /// This user already holds the per-user maximum.
    PerUserLimit,
}

impl AdmissionRejection {
    pub const fn close_reason(self) -> &'static str {
        match self {
            Self::GlobalLimit => "server connection limit reached, try again later",
            Self::PerUserLimit => "too many connections for this user, try again later",
        }
    }

    pub const fn metric_label(self) -> &'static str {
        match self {
            Self::GlobalLimit => "total_cap",
            Self::PerUserLimit => "per_user_cap",
        }
    }
}

/// What removing a connection left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// The user still holds other sockets.
    Removed { remaining: usize },
    /// The user's last socket went away; the subscription set it was serving
    /// is returned so the offline broadcast can still target those channels.
    LastConnection { channels: Vec<ChannelId> },
    /// Nothing matched (already pruned); counters are untouched.
    NotTracked,
}

struct RegisteredConnection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<UserId, Vec<RegisteredConnection>>,
    subscriptions: HashMap<UserId, HashSet<ChannelId>>,
    total: usize,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a socket, re-seeding the user's channel subscriptions.
    ///
    /// The global cap is checked before the per-user cap. Closing a rejected
    /// transport (close code 1013) is the caller's job; the registry never
    /// touches the socket.
    pub async fn connect(
        &self,
        user_id: UserId,
        channels: Vec<ChannelId>,
        outbound: mpsc::UnboundedSender<ServerEvent>,
        limits: ConnectionLimits,
    ) -> Result<ConnectionId, AdmissionRejection> {
        let mut guard = self.inner.write().await;

        if guard.total >= limits.max_total {
            metrics::increment_connections_rejected(AdmissionRejection::GlobalLimit.metric_label());
            return Err(AdmissionRejection::GlobalLimit);
        }
        let held = guard.connections.get(&user_id).map_or(0, Vec::len);
        if held >= limits.max_per_user {
            metrics::increment_connections_rejected(
                AdmissionRejection::PerUserLimit.metric_label(),
            );
            return Err(AdmissionRejection::PerUserLimit);
        }

        let connection_id = Uuid::new_v4();
        guard
            .connections
            .entry(user_id)
            .or_default()
            .push(RegisteredConnection { id: connection_id, outbound });
        guard.subscriptions.insert(user_id, channels.into_iter().collect());
        guard.total += 1;

        metrics::increment_connections_opened();
        metrics::set_connections_current(guard.total as u64);

        Ok(connection_id)
    }

    /// Remove one socket. Safe to call twice for the same connection; the
    /// second call reports `NotTracked`.
    pub async fn disconnect(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> DisconnectOutcome {
        let mut guard = self.inner.write().await;

        let Some(connections) = guard.connections.get_mut(&user_id) else {
            return DisconnectOutcome::NotTracked;
        };
        let Some(index) = connections.iter().position(|c| c.id == connection_id) else {
            return DisconnectOutcome::NotTracked;
        };

        connections.remove(index);
        guard.total -= 1;
        metrics::set_connections_current(guard.total as u64);

        let remaining = guard.connections.get(&user_id).map_or(0, Vec::len);
        if remaining > 0 {
            return DisconnectOutcome::Removed { remaining };
        }

        guard.connections.remove(&user_id);
        let mut channels: Vec<ChannelId> = guard
            .subscriptions
            .remove(&user_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        channels.sort_unstable();

        DisconnectOutcome::LastConnection { channels }
    }

    /// Grow the live subscription set; a no-op for users with no sockets.
    pub async fn add_channel(&self, user_id: UserId, channel_id: ChannelId) -> bool {
        let mut guard = self.inner.write().await;
        if !guard.connections.contains_key(&user_id) {
            return false;
        }
        guard.subscriptions.entry(user_id).or_default().insert(channel_id);
        true
    }

    /// Shrink the live subscription set; a no-op for users with no sockets.
    pub async fn remove_channel(&self, user_id: UserId, channel_id: ChannelId) -> bool {
        let mut guard = self.inner.write().await;
        match guard.subscriptions.get_mut(&user_id) {
            Some(channels) => channels.remove(&channel_id),
            None => false,
        }
    }

    /// Snapshot every connection of every user subscribed to the channel.
    ///
    /// Collected under the read lock and returned by value so fan-out never
    /// iterates live maps while sending.
    pub async fn channel_recipients(
        &self,
        channel_id: ChannelId,
    ) -> Vec<(UserId, ConnectionId, mpsc::UnboundedSender<ServerEvent>)> {
        let guard = self.inner.read().await;
        let mut recipients = Vec::new();
        for (user_id, channels) in guard.subscriptions.iter() {
            if !channels.contains(&channel_id) {
                continue;
            }
            if let Some(connections) = guard.connections.get(user_id) {
                for connection in connections {
                    recipients.push((*user_id, connection.id, connection.outbound.clone()));
                }
            }
        }
        recipients
    }

    pub async fn is_subscribed(&self, user_id: UserId, channel_id: ChannelId) -> bool {
        self.inner
            .read()
            .await
            .subscriptions
            .get(&user_id)
            .map(|channels| channels.contains(&channel_id))
            .unwrap_or(false)
    }

    pub async fn channels_of(&self, user_id: UserId) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self
            .inner
            .read()
            .await
            .subscriptions
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        channels.sort_unstable();
        channels
    }

    pub async fn connection_count(&self, user_id: UserId) -> usize {
        self.inner.read().await.connections.get(&user_id).map_or(0, Vec::len)
    }

    pub async fn total_connections(&self) -> usize {
        self.inner.read().await.total
    }

    pub async fn has_connections(&self, user_id: UserId) -> bool {
        self.inner.read().await.connections.contains_key(&user_id)
    }
}
