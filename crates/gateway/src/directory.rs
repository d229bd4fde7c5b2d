// Channel membership and profile lookups.
//
// The gateway does not own the chat schema; the API service writes it. This
// module reads the slice needed to admit a socket and attribute events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use banter_common::types::{ChannelId, UserId, UserSummary};
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::store::StoreError;

#[derive(Clone)]
pub enum ChannelDirectory {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryDirectory>>),
}

#[derive(Default)]
pub struct MemoryDirectory {
    users: HashMap<UserId, UserSummary>,
    memberships: HashMap<UserId, HashSet<ChannelId>>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

impl From<UserRow> for UserSummary {
    fn from(value: UserRow) -> Self {
        let email = value.email.unwrap_or_default();
        Self {
            id: value.id,
            name: value.name.unwrap_or_else(|| email.clone()),
            email,
            picture: value.picture,
        }
    }
}

impl ChannelDirectory {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryDirectory::default())))
    }

    /// Channels the user is a member of, in stable order.
    pub async fn channels_for_user(&self, user_id: UserId) -> Result<Vec<ChannelId>, StoreError> {
        match self {
            Self::Postgres(pool) => channels_for_user_pg(pool, user_id).await,
            Self::Memory(store) => channels_for_user_memory(store, user_id).await,
        }
    }

    /// Profile summary embedded into events attributed to the user.
    ///
    /// `None` means the token subject has no user row; the caller treats the
    /// connection as unauthenticated.
    pub async fn user_summary(&self, user_id: UserId) -> Result<Option<UserSummary>, StoreError> {
        match self {
            Self::Postgres(pool) => user_summary_pg(pool, user_id).await,
            Self::Memory(store) => user_summary_memory(store, user_id).await,
        }
    }

    pub async fn upsert_user_for_tests(&self, summary: UserSummary) {
        if let Self::Memory(store) = self {
            store.write().await.users.insert(summary.id, summary);
        }
    }

    pub async fn grant_channel_for_tests(&self, user_id: UserId, channel_id: ChannelId) {
        if let Self::Memory(store) = self {
            store
                .write()
                .await
                .memberships
                .entry(user_id)
                .or_default()
                .insert(channel_id);
        }
    }
}

async fn channels_for_user_pg(pool: &PgPool, user_id: UserId) -> Result<Vec<ChannelId>, StoreError> {
    let channels = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT channel_id FROM user_channels
        WHERE user_id = $1
        ORDER BY channel_id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(channels)
}

async fn channels_for_user_memory(
    store: &Arc<RwLock<MemoryDirectory>>,
    user_id: UserId,
) -> Result<Vec<ChannelId>, StoreError> {
    let guard = store.read().await;
    let mut channels: Vec<ChannelId> = guard
        .memberships
        .get(&user_id)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default();
    channels.sort_unstable();
    Ok(channels)
}

async fn user_summary_pg(pool: &PgPool, user_id: UserId) -> Result<Option<UserSummary>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, email, name, picture FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(UserSummary::from))
}

async fn user_summary_memory(
    store: &Arc<RwLock<MemoryDirectory>>,
    user_id: UserId,
) -> Result<Option<UserSummary>, StoreError> {
    Ok(store.read().await.users.get(&user_id).cloned())
}
