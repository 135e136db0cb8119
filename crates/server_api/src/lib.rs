//! Coordinator layer: validates intents against the store, persists, and
//! fans the matching event out to the affected room. All mutation goes
//! through the store before any broadcast (write-then-notify).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use presence::PresenceHub;
use shared::{
    domain::{ConversationId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{ConversationPayload, MessagePayload, ReplyPreview, UserSummary},
};
use storage::{Storage, StoredConversation, StoredMessage, StoredUser};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::error;

pub mod conversations;
pub mod deletion;
pub mod membership;
pub mod messages;
pub mod read;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub hub: PresenceHub,
    pub locks: ConversationLocks,
    /// Maximum age of a message that can still be deleted for everyone.
    pub everyone_delete_window: Duration,
}

impl ApiContext {
    pub fn new(storage: Storage, hub: PresenceHub) -> Self {
        Self {
            storage,
            hub,
            locks: ConversationLocks::default(),
            everyone_delete_window: Duration::seconds(120),
        }
    }
}

/// Lazily created per-conversation mutexes. Membership edits on one
/// conversation must not interleave, and within a conversation persist order
/// must equal broadcast order; holding the conversation's lock across
/// persist-then-broadcast gives both.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>>,
}

impl ConversationLocks {
    pub async fn acquire(&self, conversation_id: ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("conversation lock map");
            map.entry(conversation_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Store failures are logged here and surfaced to clients as a generic
/// internal error; the underlying detail never leaves the process.
pub(crate) fn internal(err: anyhow::Error) -> ApiError {
    error!(%err, "storage operation failed");
    ApiError::new(ErrorCode::Internal, "internal error")
}

pub(crate) async fn load_conversation(
    ctx: &ApiContext,
    conversation_id: ConversationId,
) -> Result<StoredConversation, ApiError> {
    ctx.storage
        .conversation(conversation_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("conversation not found"))
}

pub(crate) async fn ensure_participant(
    ctx: &ApiContext,
    conversation_id: ConversationId,
    user_id: UserId,
) -> Result<(), ApiError> {
    let member = ctx
        .storage
        .is_participant(conversation_id, user_id)
        .await
        .map_err(internal)?;
    if !member {
        return Err(ApiError::forbidden("user is not a participant"));
    }
    Ok(())
}

pub(crate) async fn is_admin(
    ctx: &ApiContext,
    conversation: &StoredConversation,
    user_id: UserId,
) -> Result<bool, ApiError> {
    if conversation.created_by == user_id {
        return Ok(true);
    }
    let admins = ctx
        .storage
        .admins(conversation.conversation_id)
        .await
        .map_err(internal)?;
    Ok(admins.contains(&user_id))
}

/// The group edit gate: admins and the creator always pass; with
/// `onlyAdminCanEdit` unset any participant passes.
pub(crate) async fn ensure_edit_permission(
    ctx: &ApiContext,
    conversation: &StoredConversation,
    user_id: UserId,
) -> Result<(), ApiError> {
    if is_admin(ctx, conversation, user_id).await? {
        return Ok(());
    }
    if conversation.only_admin_can_edit {
        return Err(ApiError::forbidden("Admin only"));
    }
    let member = ctx
        .storage
        .is_participant(conversation.conversation_id, user_id)
        .await
        .map_err(internal)?;
    if !member {
        return Err(ApiError::forbidden("Participants only"));
    }
    Ok(())
}

#[derive(Default)]
pub(crate) struct UserCache {
    map: HashMap<UserId, Option<StoredUser>>,
}

impl UserCache {
    pub(crate) async fn get(
        &mut self,
        ctx: &ApiContext,
        user_id: UserId,
    ) -> Result<Option<StoredUser>, ApiError> {
        if let Some(cached) = self.map.get(&user_id) {
            return Ok(cached.clone());
        }
        let resolved = ctx.storage.get_user(user_id).await.map_err(internal)?;
        self.map.insert(user_id, resolved.clone());
        Ok(resolved)
    }
}

pub(crate) async fn message_payload_with(
    ctx: &ApiContext,
    cache: &mut UserCache,
    stored: StoredMessage,
    client_id: Option<String>,
) -> Result<MessagePayload, ApiError> {
    let sender = cache.get(ctx, stored.sender_id).await?;
    let forwarded_from_user_name = match stored.forwarded_from_user {
        Some(user_id) => cache.get(ctx, user_id).await?.map(|user| user.name),
        None => None,
    };
    Ok(MessagePayload {
        id: stored.message_id,
        conversation_id: stored.conversation_id,
        sender_id: stored.sender_id,
        sender_name: sender.as_ref().map(|user| user.name.clone()),
        sender_avatar: sender.and_then(|user| user.avatar),
        content: stored.content,
        attachment: stored.attachment,
        reply_to: stored.reply_to,
        reply_preview: stored.reply_preview.map(|preview| ReplyPreview {
            sender_name: preview.sender_name,
            content: preview.content,
            has_attachment: preview.has_attachment,
        }),
        forwarded_from_user: stored.forwarded_from_user,
        forwarded_from_user_name,
        forwarded_from_conversation: stored.forwarded_from_conversation,
        is_deleted: stored.is_deleted,
        read_by: stored.read_by,
        client_id,
        created_at: stored.created_at,
    })
}

pub(crate) async fn message_payload(
    ctx: &ApiContext,
    stored: StoredMessage,
    client_id: Option<String>,
) -> Result<MessagePayload, ApiError> {
    let mut cache = UserCache::default();
    message_payload_with(ctx, &mut cache, stored, client_id).await
}

pub(crate) async fn conversation_payload(
    ctx: &ApiContext,
    conversation: &StoredConversation,
) -> Result<ConversationPayload, ApiError> {
    let participants = ctx
        .storage
        .participant_summaries(conversation.conversation_id)
        .await
        .map_err(internal)?
        .into_iter()
        .map(|user| UserSummary {
            id: user.user_id,
            name: user.name,
            avatar: user.avatar,
        })
        .collect();
    let admins = ctx
        .storage
        .admins(conversation.conversation_id)
        .await
        .map_err(internal)?;
    let last_message = match conversation.last_message_id {
        Some(message_id) => {
            match ctx.storage.load_message(message_id).await.map_err(internal)? {
                Some(stored) => Some(message_payload(ctx, stored, None).await?),
                None => None,
            }
        }
        None => None,
    };
    Ok(ConversationPayload {
        id: conversation.conversation_id,
        kind: conversation.kind,
        name: conversation.name.clone(),
        description: conversation.description.clone(),
        avatar: conversation.avatar.clone(),
        created_by: conversation.created_by,
        admins,
        participants,
        settings: shared::protocol::ConversationSettings {
            only_admin_can_send: conversation.only_admin_can_send,
            only_admin_can_edit: conversation.only_admin_can_edit,
        },
        last_message,
        unread_count: None,
        last_activity_at: conversation.last_activity_at,
    })
}
