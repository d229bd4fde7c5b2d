// WebSocket message types for the banter-chat.v1 protocol.

use serde::{Deserialize, Serialize};

use crate::types::{
    ChannelId, ChannelPayload, FileId, FilePayload, MessageId, MessagePayload, ReactionId,
    ReactionPayload, UserId, UserStatus, UserSummary,
};

/// Client -> Server: frames accepted on the chat socket.
///
/// Anything that does not deserialize into one of these variants is dropped
/// by the gateway without closing the connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Post a new top-level message to a channel.
    NewMessage {
        channel_id: ChannelId,
        content: String,
    },

    /// Post a threaded reply under an existing root message.
    MessageReply {
        channel_id: ChannelId,
        content: String,
        parent_id: MessageId,
    },

    /// Attach a reaction to a message.
    AddReaction {
        channel_id: ChannelId,
        message_id: MessageId,
        reaction_id: ReactionId,
    },

    /// Detach a previously attached reaction.
    RemoveReaction {
        channel_id: ChannelId,
        message_id: MessageId,
        reaction_id: ReactionId,
    },
}

impl ClientFrame {
    /// The channel this frame claims to operate on.
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::NewMessage { channel_id, .. }
            | Self::MessageReply { channel_id, .. }
            | Self::AddReaction { channel_id, .. }
            | Self::RemoveReaction { channel_id, .. } => *channel_id,
        }
    }

    /// Stable wire tag, used for logging and metrics labels.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::MessageReply { .. } => "message_reply",
            Self::AddReaction { .. } => "add_reaction",
            Self::RemoveReaction { .. } => "remove_reaction",
        }
    }
}

/// Server -> Client: events fanned out to channel members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A top-level message posted over the socket.
    NewMessage {
        channel_id: ChannelId,
        message: MessagePayload,
    },

    /// A message created outside the socket path (threaded replies included).
    MessageCreated {
        channel_id: ChannelId,
        message: MessagePayload,
    },

    /// An edited message, or a root message re-broadcast with `has_replies`.
    MessageUpdate {
        channel_id: ChannelId,
        message: MessagePayload,
    },

    MessageDelete {
        channel_id: ChannelId,
        message_id: MessageId,
    },

    MessageReactionAdd {
        channel_id: ChannelId,
        message_id: MessageId,
        reaction: ReactionPayload,
    },

    MessageReactionRemove {
        channel_id: ChannelId,
        message_id: MessageId,
        reaction_id: ReactionId,
        user_id: UserId,
    },

    /// A user was added to a channel.
    MemberJoined {
        channel_id: ChannelId,
        user: UserSummary,
    },

    /// A user left or was removed from a channel.
    MemberLeft {
        channel_id: ChannelId,
        user_id: UserId,
    },

    ChannelCreated { channel: ChannelPayload },

    ChannelUpdate {
        channel_id: ChannelId,
        channel: ChannelPayload,
    },

    PrivacyUpdated {
        channel_id: ChannelId,
        is_private: bool,
    },

    RoleUpdated {
        channel_id: ChannelId,
        user_id: UserId,
        role: String,
    },

    /// Presence transition, fanned out to every channel the user belongs to.
    UserStatusChange {
        user_id: UserId,
        status: UserStatus,
    },

    FileUpload {
        channel_id: ChannelId,
        file: FilePayload,
        message: MessagePayload,
    },

    FileDeleted {
        channel_id: ChannelId,
        file_id: FileId,
        message_id: MessageId,
    },
}

impl ServerEvent {
    /// Stable wire tag, used for logging and metrics labels.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::MessageCreated { .. } => "message_created",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageDelete { .. } => "message_delete",
            Self::MessageReactionAdd { .. } => "message_reaction_add",
            Self::MessageReactionRemove { .. } => "message_reaction_remove",
            Self::MemberJoined { .. } => "member_joined",
            Self::MemberLeft { .. } => "member_left",
            Self::ChannelCreated { .. } => "channel_created",
            Self::ChannelUpdate { .. } => "channel_update",
            Self::PrivacyUpdated { .. } => "privacy_updated",
            Self::RoleUpdated { .. } => "role_updated",
            Self::UserStatusChange { .. } => "user_status_change",
            Self::FileUpload { .. } => "file_upload",
            Self::FileDeleted { .. } => "file_deleted",
        }
    }
}
