// Inbound frame routing: authorize against the subscription set, persist,
// broadcast.
//
// Frames that fail validation are dropped without a reply; the sender learns
// nothing. Only store failures escape, and the serving loop answers those by
// closing the socket.

use std::sync::Arc;

use banter_common::protocol::ws::{ClientFrame, ServerEvent};
use banter_common::types::{ChannelId, MessageId, ReactionId, UserId, UserSummary};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::fanout::BroadcastFanout;
use crate::metrics;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;
use crate::store::{MessageStore, StoreError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("message store failure: {0}")]
    Store(#[from] StoreError),
}

/// Identity of the socket a frame arrived on, captured at admission and fixed
/// for the connection's lifetime.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub user_id: UserId,
    pub user: UserSummary,
}

pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceTracker>,
    fanout: Arc<BroadcastFanout>,
    store: MessageStore,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceTracker>,
        fanout: Arc<BroadcastFanout>,
        store: MessageStore,
    ) -> Self {
        Self { registry, presence, fanout, store }
    }

    /// Route one decoded frame. `Err` means a store fault the caller must
    /// treat as fatal for the connection; every validation failure is a
    /// silent drop.
    pub async fn handle_frame(
        &self,
        ctx: &ConnectionContext,
        frame: ClientFrame,
    ) -> Result<(), DispatchError> {
        let kind = frame.kind();
        let started = Instant::now();
        let result = self.route(ctx, frame).await;
        metrics::record_frame(kind, result.is_err(), started.elapsed().as_millis() as u64);
        result
    }

    async fn route(&self, ctx: &ConnectionContext, frame: ClientFrame) -> Result<(), DispatchError> {
        let channel_id = frame.channel_id();
        if !self.registry.is_subscribed(ctx.user_id, channel_id).await {
            metrics::increment_frames_dropped("unauthorized_channel");
            debug!(
                user_id = ctx.user_id,
                channel_id,
                kind = frame.kind(),
                "frame for a channel outside the sender's subscriptions, dropping"
            );
            return Ok(());
        }

        // An authorized frame counts as activity before any routing.
        if let Some(status) = self.presence.record_activity(ctx.user_id).await {
            self.fanout.broadcast_status_change(ctx.user_id, status).await;
        }

        match frame {
            ClientFrame::NewMessage { channel_id, content } => {
                self.handle_new_message(ctx, channel_id, content).await
            }
            ClientFrame::MessageReply { channel_id, content, parent_id } => {
                self.handle_reply(ctx, channel_id, content, parent_id).await
            }
            ClientFrame::AddReaction { channel_id, message_id, reaction_id } => {
                self.handle_add_reaction(ctx, channel_id, message_id, reaction_id).await
            }
            ClientFrame::RemoveReaction { channel_id, message_id, reaction_id } => {
                self.handle_remove_reaction(ctx, channel_id, message_id, reaction_id).await
            }
        }
    }

    async fn handle_new_message(
        &self,
        ctx: &ConnectionContext,
        channel_id: ChannelId,
        content: String,
    ) -> Result<(), DispatchError> {
        if content.is_empty() {
            metrics::increment_frames_dropped("empty_content");
            debug!(user_id = ctx.user_id, channel_id, "empty message content, dropping");
            return Ok(());
        }

        let message = self.store.create_message(channel_id, &ctx.user, &content).await?;
        self.fanout
            .broadcast_to_channel(ServerEvent::NewMessage { channel_id, message }, channel_id)
            .await;
        Ok(())
    }

    async fn handle_reply(
        &self,
        ctx: &ConnectionContext,
        channel_id: ChannelId,
        content: String,
        parent_id: MessageId,
    ) -> Result<(), DispatchError> {
        if content.is_empty() {
            metrics::increment_frames_dropped("empty_content");
            debug!(user_id = ctx.user_id, channel_id, "empty reply content, dropping");
            return Ok(());
        }
        if !self.message_in_channel(ctx, parent_id, channel_id).await? {
            return Ok(());
        }

        let Some(created) =
            self.store.create_reply(channel_id, &ctx.user, &content, parent_id).await?
        else {
            // The parent vanished between the check and the insert.
            metrics::increment_frames_dropped("not_found");
            return Ok(());
        };

        // Reply first, then the root message refresh that flags the thread.
        self.fanout
            .broadcast_to_channel(
                ServerEvent::MessageCreated { channel_id, message: created.reply },
                channel_id,
            )
            .await;
        self.fanout
            .broadcast_to_channel(
                ServerEvent::MessageUpdate { channel_id, message: created.root },
                channel_id,
            )
            .await;
        Ok(())
    }

    async fn handle_add_reaction(
        &self,
        ctx: &ConnectionContext,
        channel_id: ChannelId,
        message_id: MessageId,
        reaction_id: ReactionId,
    ) -> Result<(), DispatchError> {
        if !self.message_in_channel(ctx, message_id, channel_id).await? {
            return Ok(());
        }

        let Some(reaction) = self.store.add_reaction(message_id, reaction_id, &ctx.user).await?
        else {
            metrics::increment_frames_dropped("not_found");
            debug!(user_id = ctx.user_id, reaction_id, "unknown reaction kind, dropping");
            return Ok(());
        };

        self.fanout
            .broadcast_to_channel(
                ServerEvent::MessageReactionAdd { channel_id, message_id, reaction },
                channel_id,
            )
            .await;
        Ok(())
    }

    async fn handle_remove_reaction(
        &self,
        ctx: &ConnectionContext,
        channel_id: ChannelId,
        message_id: MessageId,
        reaction_id: ReactionId,
    ) -> Result<(), DispatchError> {
        if !self.message_in_channel(ctx, message_id, channel_id).await? {
            return Ok(());
        }

        let removed = self.store.remove_reaction(message_id, reaction_id, ctx.user_id).await?;
        if !removed {
            metrics::increment_frames_dropped("not_found");
            return Ok(());
        }

        self.fanout
            .broadcast_to_channel(
                ServerEvent::MessageReactionRemove { channel_id, message_id, reaction_id },
                channel_id,
            )
            .await;
        Ok(())
    }

    /// Cross-check that `message_id` exists and lives in the channel the
    /// frame claims. Emits the drop metric on failure.
    async fn message_in_channel(
        &self,
        ctx: &ConnectionContext,
        message_id: MessageId,
        channel_id: ChannelId,
    ) -> Result<bool, DispatchError> {
        match self.store.message_channel(message_id).await? {
            None => {
                metrics::increment_frames_dropped("not_found");
                debug!(user_id = ctx.user_id, message_id, "message not found, dropping");
                Ok(false)
            }
            Some(owning_channel) if owning_channel != channel_id => {
                metrics::increment_frames_dropped("cross_channel");
                debug!(
                    user_id = ctx.user_id,
                    message_id,
                    claimed_channel = channel_id,
                    owning_channel,
                    "message does not belong to the claimed channel, dropping"
                );
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use banter_common::protocol::ws::{ClientFrame, ServerEvent};
    use banter_common::types::{ReactionDetail, UserId, UserStatus, UserSummary};
    use tokio::sync::mpsc;

    use super::{ConnectionContext, EventDispatcher};
    use crate::fanout::BroadcastFanout;
    use crate::hooks::{DisconnectHooks, RecordingObserver};
    use crate::presence::PresenceTracker;
    use crate::registry::{ConnectionLimits, ConnectionRegistry};
    use crate::store::MessageStore;

    const LIMITS: ConnectionLimits = ConnectionLimits { max_per_user: 5, max_total: 100 };
    const AWAY_TIMEOUT: Duration = Duration::from_secs(300);

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceTracker>,
        store: MessageStore,
        dispatcher: EventDispatcher,
    }

    fn harness() -> Harness {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceTracker::new(Arc::clone(&registry), AWAY_TIMEOUT));
        let (observer, _departures) = RecordingObserver::new();
        let hooks = Arc::new(DisconnectHooks::start(vec![observer]));
        let fanout =
            Arc::new(BroadcastFanout::new(Arc::clone(&registry), Arc::clone(&presence), hooks));
        let store = MessageStore::memory();
        let dispatcher = EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&presence),
            fanout,
            store.clone(),
        );
        Harness { registry, presence, store, dispatcher }
    }

    fn summary(user_id: UserId) -> UserSummary {
        UserSummary {
            id: user_id,
            email: format!("user{user_id}@banter.dev"),
            name: format!("User {user_id}"),
            picture: None,
        }
    }

    fn ctx(user_id: UserId) -> ConnectionContext {
        ConnectionContext { user_id, user: summary(user_id) }
    }

    /// Admits a socket for the user and returns its receiving end.
    async fn join(
        h: &Harness,
        user_id: UserId,
        channels: Vec<i64>,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        h.registry.connect(user_id, channels, tx, LIMITS).await.expect("should admit");
        h.presence.mark_online(user_id).await;
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ── authorization ────────────────────────────────────────────────

    #[tokio::test]
    async fn unsubscribed_channel_frame_is_dropped() {
        let h = harness();
        let mut rx = join(&h, 1, vec![10]).await;
        drain(&mut rx);

        let frame = ClientFrame::NewMessage { channel_id: 99, content: "hi".into() };
        h.dispatcher.handle_frame(&ctx(1), frame).await.expect("drop is not an error");

        assert!(drain(&mut rx).is_empty(), "nothing should be broadcast");
    }

    // ── new_message ──────────────────────────────────────────────────

    #[tokio::test]
    async fn new_message_is_persisted_and_broadcast_to_the_channel() {
        let h = harness();
        let mut rx_author = join(&h, 1, vec![10]).await;
        let mut rx_peer = join(&h, 2, vec![10]).await;
        drain(&mut rx_author);
        drain(&mut rx_peer);

        let frame = ClientFrame::NewMessage { channel_id: 10, content: "hello there".into() };
        h.dispatcher.handle_frame(&ctx(1), frame).await.expect("should dispatch");

        for rx in [&mut rx_author, &mut rx_peer] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            match &events[0] {
                ServerEvent::NewMessage { channel_id, message } => {
                    assert_eq!(*channel_id, 10);
                    assert_eq!(message.content, "hello there");
                    assert_eq!(message.user.id, 1);
                    assert_eq!(message.parent_id, None);
                }
                other => panic!("expected new_message, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn empty_message_content_is_dropped() {
        let h = harness();
        let mut rx = join(&h, 1, vec![10]).await;
        drain(&mut rx);

        let frame = ClientFrame::NewMessage { channel_id: 10, content: String::new() };
        h.dispatcher.handle_frame(&ctx(1), frame).await.expect("drop is not an error");

        assert!(drain(&mut rx).is_empty());
    }

    // ── message_reply ────────────────────────────────────────────────

    #[tokio::test]
    async fn reply_broadcasts_creation_then_root_update() {
        let h = harness();
        let mut rx = join(&h, 1, vec![10]).await;
        let root = h
            .store
            .create_message(10, &summary(1), "root post")
            .await
            .expect("should create root");
        drain(&mut rx);

        let frame = ClientFrame::MessageReply {
            channel_id: 10,
            content: "threaded answer".into(),
            parent_id: root.id,
        };
        h.dispatcher.handle_frame(&ctx(1), frame).await.expect("should dispatch");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2, "reply then root update");
        match &events[0] {
            ServerEvent::MessageCreated { message, .. } => {
                assert_eq!(message.content, "threaded answer");
                assert_eq!(message.parent_id, Some(root.id));
                let parent = message.parent.as_ref().expect("reply should carry parent summary");
                assert_eq!(parent.id, root.id);
            }
            other => panic!("expected message_created, got {other:?}"),
        }
        match &events[1] {
            ServerEvent::MessageUpdate { message, .. } => {
                assert_eq!(message.id, root.id);
                assert_eq!(message.has_replies, Some(true));
            }
            other => panic!("expected message_update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reply_to_missing_parent_is_dropped() {
        let h = harness();
        let mut rx = join(&h, 1, vec![10]).await;
        drain(&mut rx);

        let frame =
            ClientFrame::MessageReply { channel_id: 10, content: "into the void".into(), parent_id: 404 };
        h.dispatcher.handle_frame(&ctx(1), frame).await.expect("drop is not an error");

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn reply_claiming_the_wrong_channel_is_dropped() {
        let h = harness();
        let mut rx = join(&h, 1, vec![10, 11]).await;
        let root =
            h.store.create_message(11, &summary(1), "lives in 11").await.expect("should create");
        drain(&mut rx);

        let frame = ClientFrame::MessageReply {
            channel_id: 10,
            content: "wrong channel".into(),
            parent_id: root.id,
        };
        h.dispatcher.handle_frame(&ctx(1), frame).await.expect("drop is not an error");

        assert!(drain(&mut rx).is_empty());
    }

    // ── reactions ────────────────────────────────────────────────────

    async fn seed_reaction_kind(h: &Harness) {
        h.store
            .insert_reaction_kind_for_tests(ReactionDetail {
                id: 5,
                code: "thumbsup".into(),
                is_system: true,
                image_url: None,
            })
            .await;
    }

    #[tokio::test]
    async fn reaction_add_and_remove_round_trip() {
        let h = harness();
        seed_reaction_kind(&h).await;
        let mut rx = join(&h, 1, vec![10]).await;
        let message =
            h.store.create_message(10, &summary(1), "react to me").await.expect("should create");
        drain(&mut rx);

        let add = ClientFrame::AddReaction { channel_id: 10, message_id: message.id, reaction_id: 5 };
        h.dispatcher.handle_frame(&ctx(1), add).await.expect("should dispatch");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::MessageReactionAdd { message_id, reaction, .. } => {
                assert_eq!(*message_id, message.id);
                assert_eq!(reaction.reaction.code, "thumbsup");
                assert_eq!(reaction.user.id, 1);
            }
            other => panic!("expected message_reaction_add, got {other:?}"),
        }

        let remove =
            ClientFrame::RemoveReaction { channel_id: 10, message_id: message.id, reaction_id: 5 };
        h.dispatcher.handle_frame(&ctx(1), remove).await.expect("should dispatch");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServerEvent::MessageReactionRemove { message_id, reaction_id, .. }
                if *message_id == message.id && *reaction_id == 5
        ));
    }

    #[tokio::test]
    async fn removing_an_absent_reaction_broadcasts_nothing() {
        let h = harness();
        seed_reaction_kind(&h).await;
        let mut rx = join(&h, 1, vec![10]).await;
        let message =
            h.store.create_message(10, &summary(1), "untouched").await.expect("should create");
        drain(&mut rx);

        let remove =
            ClientFrame::RemoveReaction { channel_id: 10, message_id: message.id, reaction_id: 5 };
        h.dispatcher.handle_frame(&ctx(1), remove).await.expect("drop is not an error");

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn reaction_on_message_from_another_channel_is_dropped() {
        let h = harness();
        seed_reaction_kind(&h).await;
        let mut rx = join(&h, 1, vec![10, 11]).await;
        let message =
            h.store.create_message(11, &summary(1), "elsewhere").await.expect("should create");
        drain(&mut rx);

        let add = ClientFrame::AddReaction { channel_id: 10, message_id: message.id, reaction_id: 5 };
        h.dispatcher.handle_frame(&ctx(1), add).await.expect("drop is not an error");

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unknown_reaction_kind_is_dropped() {
        let h = harness();
        let mut rx = join(&h, 1, vec![10]).await;
        let message =
            h.store.create_message(10, &summary(1), "no kinds seeded").await.expect("should create");
        drain(&mut rx);

        let add = ClientFrame::AddReaction { channel_id: 10, message_id: message.id, reaction_id: 99 };
        h.dispatcher.handle_frame(&ctx(1), add).await.expect("drop is not an error");

        assert!(drain(&mut rx).is_empty());
    }

    // ── presence coupling ────────────────────────────────────────────

    #[tokio::test]
    async fn frame_from_an_away_user_announces_the_return_first() {
        tokio::time::pause();
        let h = harness();
        let mut rx = join(&h, 1, vec![10]).await;
        drain(&mut rx);

        tokio::time::advance(AWAY_TIMEOUT).await;
        assert_eq!(h.presence.check_away(1).await, Some(UserStatus::Away));

        let frame = ClientFrame::NewMessage { channel_id: 10, content: "back".into() };
        h.dispatcher.handle_frame(&ctx(1), frame).await.expect("should dispatch");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ServerEvent::UserStatusChange { user_id: 1, status: UserStatus::Online }
        );
        assert!(matches!(&events[1], ServerEvent::NewMessage { .. }));
    }
}
