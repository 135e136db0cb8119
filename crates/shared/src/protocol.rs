use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ConversationId, ConversationKind, DeleteScope, MessageId, UserId},
    error::ApiError,
};

/// Response envelope shared by the REST surface and realtime acks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T = serde_json::Value> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            msg: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            msg: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            msg: Some(msg.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSettings {
    pub only_admin_can_send: bool,
    pub only_admin_can_edit: bool,
}

/// Denormalized reply context captured at send time; survives deletion of
/// the replied-to message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub has_attachment: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_preview: Option<ReplyPreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from_user: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from_user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from_conversation: Option<ConversationId>,
    pub is_deleted: bool,
    pub read_by: Vec<UserId>,
    /// Echo of the sender-supplied correlation token so the sending client
    /// can replace its optimistic local copy in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    pub id: ConversationId,
    pub kind: ConversationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub created_by: UserId,
    pub admins: Vec<UserId>,
    pub participants: Vec<UserSummary>,
    pub settings: ConversationSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<i64>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGroupSettingsPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub muted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute_until: Option<DateTime<Utc>>,
}

/// Ack body for `joinConversation`: the conversation plus a page of recent
/// history, newest last.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub conversation: ConversationPayload,
    pub messages: Vec<MessagePayload>,
}

/// Client-to-server frame: an intent plus an optional ack correlation
/// sequence. Frames without `seq` are fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub intent: ClientIntent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientIntent {
    #[serde(rename_all = "camelCase")]
    JoinConversation { conversation_id: ConversationId },
    #[serde(rename_all = "camelCase")]
    LeaveConversation { conversation_id: ConversationId },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        conversation_id: ConversationId,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        attachment: Option<String>,
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        reply_to: Option<MessageId>,
    },
    #[serde(rename = "message:delete", rename_all = "camelCase")]
    DeleteMessages {
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
        scope: DeleteScope,
    },
    #[serde(rename = "message:undelete", rename_all = "camelCase")]
    UndeleteMessages {
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
    },
    #[serde(rename = "message:forward", rename_all = "camelCase")]
    ForwardMessage {
        source_message_id: MessageId,
        target_conversation_id: ConversationId,
    },
    #[serde(rename = "conversation:markRead", rename_all = "camelCase")]
    MarkRead { conversation_id: ConversationId },
    #[serde(rename = "conversation:subscribe", rename_all = "camelCase")]
    Subscribe { conversation_id: ConversationId },
    #[serde(rename = "conversation:unsubscribe", rename_all = "camelCase")]
    Unsubscribe { conversation_id: ConversationId },
    #[serde(rename_all = "camelCase")]
    Typing { conversation_id: ConversationId },
    #[serde(rename = "stop_typing", rename_all = "camelCase")]
    StopTyping { conversation_id: ConversationId },
    #[serde(rename_all = "camelCase")]
    UpdateProfile {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFrame {
    pub seq: u64,
    #[serde(flatten)]
    pub body: Envelope<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "message:new")]
    MessageNew(MessagePayload),
    #[serde(rename = "message:deleted", rename_all = "camelCase")]
    MessageDeleted {
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
        scope: DeleteScope,
        user_id: UserId,
    },
    #[serde(rename = "message:undeleted", rename_all = "camelCase")]
    MessageUndeleted {
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
        user_id: UserId,
    },
    #[serde(rename = "conversation:read", rename_all = "camelCase")]
    ConversationRead {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    #[serde(rename = "stop_typing", rename_all = "camelCase")]
    StopTyping {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    #[serde(rename = "conversation:updated", rename_all = "camelCase")]
    ConversationUpdated {
        conversation_id: ConversationId,
        conversation: ConversationPayload,
    },
    #[serde(rename = "conversation:members:added", rename_all = "camelCase")]
    MembersAdded {
        conversation_id: ConversationId,
        added: Vec<UserId>,
    },
    #[serde(rename = "conversation:members:removed", rename_all = "camelCase")]
    MembersRemoved {
        conversation_id: ConversationId,
        removed: Vec<UserId>,
    },
    #[serde(rename = "conversation:settings:updated", rename_all = "camelCase")]
    SettingsUpdated {
        conversation_id: ConversationId,
        conversation: ConversationPayload,
    },
    #[serde(rename = "ack")]
    Ack(AckFrame),
    #[serde(rename = "error")]
    Error(ApiError),
}
