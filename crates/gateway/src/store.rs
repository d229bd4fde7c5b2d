// Message, reply, and reaction persistence for socket-originated frames.

use std::collections::HashMap;
use std::sync::Arc;

use banter_common::types::{
    ChannelId, MessageId, MessagePayload, ParentSummary, ReactionDetail, ReactionId,
    ReactionPayload, UserId, UserSummary,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A persisted reply plus the refreshed root message.
///
/// The root is re-broadcast with `has_replies` set so clients render the
/// thread indicator without refetching.
#[derive(Debug, Clone)]
pub struct ReplyCreated {
    pub reply: MessagePayload,
    pub root: MessagePayload,
}

#[derive(Clone)]
pub enum MessageStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryMessageStore>>),
}

#[derive(Default)]
pub struct MemoryMessageStore {
    next_message_id: MessageId,
    next_reaction_row_id: i64,
    messages: HashMap<MessageId, StoredMessage>,
    reaction_rows: HashMap<i64, StoredReaction>,
    reaction_kinds: HashMap<ReactionId, ReactionDetail>,
}

#[derive(Clone)]
struct StoredMessage {
    id: MessageId,
    content: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    channel_id: ChannelId,
    parent_id: Option<MessageId>,
    author: UserSummary,
}

#[derive(Clone)]
struct StoredReaction {
    id: i64,
    message_id: MessageId,
    reaction_id: ReactionId,
    user_id: UserId,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MessageInsertRow {
    id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RootMessageRow {
    id: i64,
    content: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    channel_id: i64,
    author_id: i64,
    author_email: Option<String>,
    author_name: Option<String>,
    author_picture: Option<String>,
}

impl RootMessageRow {
    fn author_summary(&self) -> UserSummary {
        let email = self.author_email.clone().unwrap_or_default();
        UserSummary {
            id: self.author_id,
            name: self.author_name.clone().unwrap_or_else(|| email.clone()),
            email,
            picture: self.author_picture.clone(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReactionInsertRow {
    id: i64,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReactionKindRow {
    id: i64,
    code: String,
    is_system: bool,
    image_url: Option<String>,
}

impl From<ReactionKindRow> for ReactionDetail {
    fn from(value: ReactionKindRow) -> Self {
        Self {
            id: value.id,
            code: value.code,
            is_system: value.is_system,
            image_url: value.image_url,
        }
    }
}

impl MessageStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryMessageStore::default())))
    }

    /// Persist a top-level message and return its broadcast payload.
    pub async fn create_message(
        &self,
        channel_id: ChannelId,
        author: &UserSummary,
        content: &str,
    ) -> Result<MessagePayload, StoreError> {
        match self {
            Self::Postgres(pool) => create_message_pg(pool, channel_id, author, content).await,
            Self::Memory(store) => create_message_memory(store, channel_id, author, content).await,
        }
    }

    /// Persist a threaded reply.
    ///
    /// Returns `None` when the parent does not exist or lives in a different
    /// channel than the frame claimed.
    pub async fn create_reply(
        &self,
        channel_id: ChannelId,
        author: &UserSummary,
        content: &str,
        parent_id: MessageId,
    ) -> Result<Option<ReplyCreated>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                create_reply_pg(pool, channel_id, author, content, parent_id).await
            }
            Self::Memory(store) => {
                create_reply_memory(store, channel_id, author, content, parent_id).await
            }
        }
    }

    /// The channel a message belongs to, if the message exists.
    pub async fn message_channel(
        &self,
        message_id: MessageId,
    ) -> Result<Option<ChannelId>, StoreError> {
        match self {
            Self::Postgres(pool) => message_channel_pg(pool, message_id).await,
            Self::Memory(store) => message_channel_memory(store, message_id).await,
        }
    }

    /// Attach a reaction; `None` when the reaction kind does not exist.
    pub async fn add_reaction(
        &self,
        message_id: MessageId,
        reaction_id: ReactionId,
        user: &UserSummary,
    ) -> Result<Option<ReactionPayload>, StoreError> {
        match self {
            Self::Postgres(pool) => add_reaction_pg(pool, message_id, reaction_id, user).await,
            Self::Memory(store) => add_reaction_memory(store, message_id, reaction_id, user).await,
        }
    }

    /// Detach a reaction; returns whether a row was actually removed.
    pub async fn remove_reaction(
        &self,
        message_id: MessageId,
        reaction_id: ReactionId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        match self {
            Self::Postgres(pool) => {
                remove_reaction_pg(pool, message_id, reaction_id, user_id).await
            }
            Self::Memory(store) => {
                remove_reaction_memory(store, message_id, reaction_id, user_id).await
            }
        }
    }

    pub async fn insert_reaction_kind_for_tests(&self, detail: ReactionDetail) {
        if let Self::Memory(store) = self {
            store.write().await.reaction_kinds.insert(detail.id, detail);
        }
    }
}

// ── Postgres implementations ────────────────────────────────────────────────

async fn create_message_pg(
    pool: &PgPool,
    channel_id: ChannelId,
    author: &UserSummary,
    content: &str,
) -> Result<MessagePayload, StoreError> {
    let row = sqlx::query_as::<_, MessageInsertRow>(
        r#"
        INSERT INTO messages (content, user_id, channel_id)
        VALUES ($1, $2, $3)
        RETURNING id, created_at, updated_at
        "#,
    )
    .bind(content)
    .bind(author.id)
    .bind(channel_id)
    .fetch_one(pool)
    .await?;

    Ok(MessagePayload {
        id: row.id,
        content: content.to_string(),
        created_at: row.created_at,
        updated_at: row.updated_at,
        user_id: author.id,
        channel_id,
        parent_id: None,
        has_replies: None,
        parent: None,
        user: author.clone(),
    })
}

async fn create_reply_pg(
    pool: &PgPool,
    channel_id: ChannelId,
    author: &UserSummary,
    content: &str,
    parent_id: MessageId,
) -> Result<Option<ReplyCreated>, StoreError> {
    let root = sqlx::query_as::<_, RootMessageRow>(
        r#"
        SELECT m.id, m.content, m.created_at, m.updated_at, m.channel_id,
               u.id AS author_id, u.email AS author_email,
               u.name AS author_name, u.picture AS author_picture
        FROM messages m
        JOIN users u ON u.id = m.user_id
        WHERE m.id = $1
        "#,
    )
    .bind(parent_id)
    .fetch_optional(pool)
    .await?;

    let Some(root) = root else {
        return Ok(None);
    };
    if root.channel_id != channel_id {
        return Ok(None);
    }

    let inserted = sqlx::query_as::<_, MessageInsertRow>(
        r#"
        INSERT INTO messages (content, user_id, channel_id, parent_id)
        VALUES ($1, $2, $3, $4)
        RETURNING id, created_at, updated_at
        "#,
    )
    .bind(content)
    .bind(author.id)
    .bind(channel_id)
    .bind(parent_id)
    .fetch_one(pool)
    .await?;

    Ok(Some(build_reply_created(
        channel_id,
        author,
        content,
        &root,
        inserted.id,
        inserted.created_at,
        inserted.updated_at,
    )))
}

async fn message_channel_pg(
    pool: &PgPool,
    message_id: MessageId,
) -> Result<Option<ChannelId>, StoreError> {
    let channel_id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT channel_id FROM messages WHERE id = $1
        "#,
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await?;

    Ok(channel_id)
}

async fn add_reaction_pg(
    pool: &PgPool,
    message_id: MessageId,
    reaction_id: ReactionId,
    user: &UserSummary,
) -> Result<Option<ReactionPayload>, StoreError> {
    let kind = sqlx::query_as::<_, ReactionKindRow>(
        r#"
        SELECT id, code, is_system, image_url FROM reactions
        WHERE id = $1
        "#,
    )
    .bind(reaction_id)
    .fetch_optional(pool)
    .await?;

    let Some(kind) = kind else {
        return Ok(None);
    };

    let row = sqlx::query_as::<_, ReactionInsertRow>(
        r#"
        INSERT INTO message_reactions (message_id, reaction_id, user_id)
        VALUES ($1, $2, $3)
        RETURNING id, created_at
        "#,
    )
    .bind(message_id)
    .bind(reaction_id)
    .bind(user.id)
    .fetch_one(pool)
    .await?;

    Ok(Some(ReactionPayload {
        id: row.id,
        message_id,
        reaction_id,
        user_id: user.id,
        created_at: row.created_at,
        reaction: kind.into(),
        user: user.clone(),
    }))
}

async fn remove_reaction_pg(
    pool: &PgPool,
    message_id: MessageId,
    reaction_id: ReactionId,
    user_id: UserId,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        DELETE FROM message_reactions
        WHERE message_id = $1 AND reaction_id = $2 AND user_id = $3
        "#,
    )
    .bind(message_id)
    .bind(reaction_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ── Memory implementations ──────────────────────────────────────────────────

async fn create_message_memory(
    store: &Arc<RwLock<MemoryMessageStore>>,
    channel_id: ChannelId,
    author: &UserSummary,
    content: &str,
) -> Result<MessagePayload, StoreError> {
    let mut guard = store.write().await;
    let message = guard.insert_message(channel_id, author, content, None);
    Ok(message.into_payload(None, None))
}

async fn create_reply_memory(
    store: &Arc<RwLock<MemoryMessageStore>>,
    channel_id: ChannelId,
    author: &UserSummary,
    content: &str,
    parent_id: MessageId,
) -> Result<Option<ReplyCreated>, StoreError> {
    let mut guard = store.write().await;

    let Some(root) = guard.messages.get(&parent_id).cloned() else {
        return Ok(None);
    };
    if root.channel_id != channel_id {
        return Ok(None);
    }

    let reply = guard.insert_message(channel_id, author, content, Some(parent_id));
    let parent_summary = ParentSummary {
        id: root.id,
        content: root.content.clone(),
        created_at: root.created_at,
        user_id: root.author.id,
        channel_id: root.channel_id,
    };

    let mut root_payload = root.clone().into_payload(None, None);
    root_payload.has_replies = Some(true);

    Ok(Some(ReplyCreated {
        reply: reply.into_payload(Some(parent_id), Some(parent_summary)),
        root: root_payload,
    }))
}

async fn message_channel_memory(
    store: &Arc<RwLock<MemoryMessageStore>>,
    message_id: MessageId,
) -> Result<Option<ChannelId>, StoreError> {
    Ok(store.read().await.messages.get(&message_id).map(|message| message.channel_id))
}

async fn add_reaction_memory(
    store: &Arc<RwLock<MemoryMessageStore>>,
    message_id: MessageId,
    reaction_id: ReactionId,
    user: &UserSummary,
) -> Result<Option<ReactionPayload>, StoreError> {
    let mut guard = store.write().await;

    let Some(kind) = guard.reaction_kinds.get(&reaction_id).cloned() else {
        return Ok(None);
    };

    guard.next_reaction_row_id += 1;
    let row = StoredReaction {
        id: guard.next_reaction_row_id,
        message_id,
        reaction_id,
        user_id: user.id,
        created_at: Utc::now(),
    };
    let payload = ReactionPayload {
        id: row.id,
        message_id,
        reaction_id,
        user_id: user.id,
        created_at: row.created_at,
        reaction: kind,
        user: user.clone(),
    };
    guard.reaction_rows.insert(row.id, row);

    Ok(Some(payload))
}

async fn remove_reaction_memory(
    store: &Arc<RwLock<MemoryMessageStore>>,
    message_id: MessageId,
    reaction_id: ReactionId,
    user_id: UserId,
) -> Result<bool, StoreError> {
    let mut guard = store.write().await;
    let row_id = guard
        .reaction_rows
        .iter()
        .find(|(_, row)| {
            row.message_id == message_id && row.reaction_id == reaction_id && row.user_id == user_id
        })
        .map(|(id, _)| *id);

    Ok(match row_id {
        Some(id) => guard.reaction_rows.remove(&id).is_some(),
        None => false,
    })
}

impl MemoryMessageStore {
    fn insert_message(
        &mut self,
        channel_id: ChannelId,
        author: &UserSummary,
        content: &str,
        parent_id: Option<MessageId>,
    ) -> StoredMessage {
        self.next_message_id += 1;
        let now = Utc::now();
        let message = StoredMessage {
            id: self.next_message_id,
            content: content.to_string(),
            created_at: now,
            updated_at: now,
            channel_id,
            parent_id,
            author: author.clone(),
        };
        self.messages.insert(message.id, message.clone());
        message
    }
}

impl StoredMessage {
    fn into_payload(
        self,
        parent_id: Option<MessageId>,
        parent: Option<ParentSummary>,
    ) -> MessagePayload {
        MessagePayload {
            id: self.id,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
            user_id: self.author.id,
            channel_id: self.channel_id,
            parent_id,
            has_replies: None,
            parent,
            user: self.author,
        }
    }
}

fn build_reply_created(
    channel_id: ChannelId,
    author: &UserSummary,
    content: &str,
    root: &RootMessageRow,
    reply_id: MessageId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> ReplyCreated {
    let parent_summary = ParentSummary {
        id: root.id,
        content: root.content.clone(),
        created_at: root.created_at,
        user_id: root.author_id,
        channel_id: root.channel_id,
    };

    let reply = MessagePayload {
        id: reply_id,
        content: content.to_string(),
        created_at,
        updated_at,
        user_id: author.id,
        channel_id,
        parent_id: Some(root.id),
        has_replies: None,
        parent: Some(parent_summary),
        user: author.clone(),
    };

    let root = MessagePayload {
        id: root.id,
        content: root.content.clone(),
        created_at: root.created_at,
        updated_at: root.updated_at,
        user_id: root.author_id,
        channel_id: root.channel_id,
        parent_id: None,
        has_replies: Some(true),
        parent: None,
        user: root.author_summary(),
    };

    ReplyCreated { reply, root }
}
