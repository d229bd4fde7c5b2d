// Presence tracking: online/away records for users with live sockets.
//
// Offline is represented by absence. A record is created when a user's first
// socket is admitted and deleted when the last one goes away, so a user with
// no connections can never be online or away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use banter_common::types::{UserId, UserStatus};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::metrics;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiveStatus {
    Online,
    Away,
}

impl LiveStatus {
    const fn as_user_status(self) -> UserStatus {
        match self {
            Self::Online => UserStatus::Online,
            Self::Away => UserStatus::Away,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PresenceRecord {
    status: LiveStatus,
    last_activity: Instant,
}

/// Tracks which users are online or away.
///
/// Every transition method returns the status to broadcast, or `None` when
/// nothing changed; the caller owns the `user_status_change` fan-out.
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    away_timeout: Duration,
    records: RwLock<HashMap<UserId, PresenceRecord>>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<ConnectionRegistry>, away_timeout: Duration) -> Self {
        Self { registry, away_timeout, records: RwLock::new(HashMap::new()) }
    }

    /// A connection was admitted for the user.
    pub async fn mark_online(&self, user_id: UserId) -> Option<UserStatus> {
        let mut records = self.records.write().await;
        let now = Instant::now();
        match records.get_mut(&user_id) {
            None => {
                records.insert(
                    user_id,
                    PresenceRecord { status: LiveStatus::Online, last_activity: now },
                );
                metrics::increment_presence_transitions(UserStatus::Online.as_str());
                Some(UserStatus::Online)
            }
            Some(record) if record.status == LiveStatus::Away => {
                record.status = LiveStatus::Online;
                record.last_activity = now;
                metrics::increment_presence_transitions(UserStatus::Online.as_str());
                Some(UserStatus::Online)
            }
            Some(record) => {
                // Already online; a new socket counts as activity but there
                // is nothing to broadcast.
                record.last_activity = now;
                None
            }
        }
    }

    /// The user did something on one of their sockets.
    pub async fn record_activity(&self, user_id: UserId) -> Option<UserStatus> {
        let mut records = self.records.write().await;
        let now = Instant::now();
        match records.get_mut(&user_id) {
            Some(record) => {
                record.last_activity = now;
                if record.status == LiveStatus::Away {
                    record.status = LiveStatus::Online;
                    metrics::increment_presence_transitions(UserStatus::Online.as_str());
                    return Some(UserStatus::Online);
                }
                None
            }
            None => {
                // Activity cannot resurrect a disconnected user. A live user
                // without a record means the record was lost; recreate it
                // quietly.
                if self.registry.has_connections(user_id).await {
                    records.insert(
                        user_id,
                        PresenceRecord { status: LiveStatus::Online, last_activity: now },
                    );
                }
                None
            }
        }
    }

    /// Periodic idle check. Flips online users away after `away_timeout` of
    /// inactivity; never touches away or absent records.
    pub async fn check_away(&self, user_id: UserId) -> Option<UserStatus> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&user_id)?;
        if record.status != LiveStatus::Online {
            return None;
        }
        if record.last_activity.elapsed() < self.away_timeout {
            return None;
        }

        record.status = LiveStatus::Away;
        metrics::increment_presence_transitions(UserStatus::Away.as_str());
        Some(UserStatus::Away)
    }

    /// The user's last connection went away; drop the record.
    pub async fn mark_offline(&self, user_id: UserId) -> Option<UserStatus> {
        let removed = self.records.write().await.remove(&user_id);
        removed.map(|_| {
            metrics::increment_presence_transitions(UserStatus::Offline.as_str());
            UserStatus::Offline
        })
    }

    /// Current status as observed from outside.
    pub async fn status_of(&self, user_id: UserId) -> UserStatus {
        if !self.registry.has_connections(user_id).await {
            return UserStatus::Offline;
        }
        self.records
            .read()
            .await
            .get(&user_id)
            .map(|record| record.status.as_user_status())
            .unwrap_or(UserStatus::Offline)
    }
}
