// Core domain types shared across all Banter crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Row identifiers as assigned by the chat schema.
pub type UserId = i64;
pub type ChannelId = i64;
pub type MessageId = i64;
pub type ReactionId = i64;
pub type FileId = i64;

/// Presence of a user as observed by the gateway.
///
/// `Offline` is only ever broadcast; a user with no live connections has no
/// presence record at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Online,
    Away,
    Offline,
}

impl UserStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }
}

/// Profile summary embedded in event payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: UserId,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// A chat message as fanned out to channel members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePayload {
    pub id: MessageId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    /// Root message ID when this message is a threaded reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
    /// Set when a root message is re-broadcast after gaining its first reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_replies: Option<bool>,
    /// Condensed root message, present on reply payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentSummary>,
    pub user: UserSummary,
}

/// Condensed root-message view carried inside a reply payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentSummary {
    pub id: MessageId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    pub channel_id: ChannelId,
}

/// A reaction row joined with its kind and the reacting user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionPayload {
    pub id: i64,
    pub message_id: MessageId,
    pub reaction_id: ReactionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub reaction: ReactionDetail,
    pub user: UserSummary,
}

/// The reaction kind itself (system emoji code or custom image).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionDetail {
    pub id: ReactionId,
    pub code: String,
    pub is_system: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A channel as broadcast on create or update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelPayload {
    pub id: ChannelId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub is_private: bool,
    pub is_dm: bool,
    #[serde(default)]
    pub users: Vec<UserSummary>,
}

/// An uploaded file attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilePayload {
    pub id: FileId,
    pub message_id: MessageId,
    pub file_name: String,
    pub content_type: String,
    pub file_size: i64,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: UserId,
}
