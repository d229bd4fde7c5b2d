// Event fan-out: snapshot the recipients, send outside the registry lock,
// prune dead sockets afterwards.
//
// Pruning a user's last socket cascades into an offline broadcast, which can
// itself hit more dead sockets. The cascade runs on an iterative work queue;
// every prune shrinks the connection population, so it terminates.

use std::collections::VecDeque;
use std::sync::Arc;

use banter_common::protocol::ws::ServerEvent;
use banter_common::types::{ChannelId, UserId, UserStatus};
use tracing::{debug, info};

use crate::hooks::DisconnectHooks;
use crate::metrics;
use crate::presence::PresenceTracker;
use crate::registry::{ConnectionId, ConnectionRegistry, DisconnectOutcome};

/// One unit of fan-out work.
#[derive(Debug)]
enum DeliveryJob {
    /// Deliver an event to every connection subscribed to a channel.
    Channel { channel_id: ChannelId, event: ServerEvent },
    /// Announce a presence change to the given channels. The channel set is
    /// captured by the caller; an offline user no longer has subscriptions to
    /// look up.
    Status { user_id: UserId, status: UserStatus, channels: Vec<ChannelId> },
}

pub struct BroadcastFanout {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceTracker>,
    hooks: Arc<DisconnectHooks>,
}

impl BroadcastFanout {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceTracker>,
        hooks: Arc<DisconnectHooks>,
    ) -> Self {
        Self { registry, presence, hooks }
    }

    /// Deliver `event` to every connection subscribed to `channel_id`.
    /// Returns how many sockets accepted it.
    pub async fn broadcast_to_channel(&self, event: ServerEvent, channel_id: ChannelId) -> usize {
        self.run_delivery(VecDeque::from([DeliveryJob::Channel { channel_id, event }])).await
    }

    /// Announce a live presence transition to the user's current channels.
    pub async fn broadcast_status_change(&self, user_id: UserId, status: UserStatus) {
        let channels = self.registry.channels_of(user_id).await;
        if channels.is_empty() {
            return;
        }
        self.run_delivery(VecDeque::from([DeliveryJob::Status { user_id, status, channels }]))
            .await;
    }

    /// Shared disconnect path: remove the connection and, when it was the
    /// user's last, flip presence offline, broadcast the transition to the
    /// channels the connection was serving, and queue the side-effect hook.
    pub async fn disconnect_and_cleanup(&self, user_id: UserId, connection_id: ConnectionId) {
        let mut jobs = VecDeque::new();
        self.cleanup_connection(user_id, connection_id, &mut jobs).await;
        self.run_delivery(jobs).await;
    }

    /// Drain the work queue. Each job sweeps its recipients, collects the
    /// connections whose sender is gone, and prunes them after the sweep;
    /// prunes may queue follow-up status jobs. Returns the delivered count of
    /// the first job.
    async fn run_delivery(&self, mut jobs: VecDeque<DeliveryJob>) -> usize {
        let mut initial_delivered = None;

        while let Some(job) = jobs.pop_front() {
            let mut failures: Vec<(UserId, ConnectionId)> = Vec::new();
            let delivered = match job {
                DeliveryJob::Channel { channel_id, event } => {
                    self.deliver_to_channel(channel_id, &event, &mut failures).await
                }
                DeliveryJob::Status { user_id, status, channels } => {
                    let event = ServerEvent::UserStatusChange { user_id, status };
                    let mut delivered = 0;
                    for channel_id in channels {
                        delivered +=
                            self.deliver_to_channel(channel_id, &event, &mut failures).await;
                    }
                    delivered
                }
            };

            metrics::add_events_delivered(delivered as u64);
            initial_delivered.get_or_insert(delivered);

            for (failed_user, failed_connection) in failures {
                metrics::increment_delivery_failures();
                debug!(
                    user_id = failed_user,
                    connection_id = %failed_connection,
                    "send failed, pruning connection"
                );
                self.cleanup_connection(failed_user, failed_connection, &mut jobs).await;
            }
        }

        initial_delivered.unwrap_or(0)
    }

    async fn deliver_to_channel(
        &self,
        channel_id: ChannelId,
        event: &ServerEvent,
        failures: &mut Vec<(UserId, ConnectionId)>,
    ) -> usize {
        let recipients = self.registry.channel_recipients(channel_id).await;
        let mut delivered = 0;
        for (user_id, connection_id, outbound) in recipients {
            if outbound.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                failures.push((user_id, connection_id));
            }
        }
        delivered
    }

    async fn cleanup_connection(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        jobs: &mut VecDeque<DeliveryJob>,
    ) {
        match self.registry.disconnect(user_id, connection_id).await {
            DisconnectOutcome::Removed { remaining } => {
                debug!(user_id, %connection_id, remaining, "connection removed");
            }
            DisconnectOutcome::LastConnection { channels } => {
                if let Some(status) = self.presence.mark_offline(user_id).await {
                    jobs.push_back(DeliveryJob::Status { user_id, status, channels });
                }
                self.hooks.notify_disconnect(user_id);
                info!(user_id, %connection_id, "last connection closed, user offline");
            }
            DisconnectOutcome::NotTracked => {}
        }
    }
}
