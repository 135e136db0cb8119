//! MembershipCoordinator: participant set edits, group settings and
//! metadata, per-user mute state. Edits on one conversation are serialized
//! by its lock so concurrent changes cannot lose updates.

use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, ConversationKind, UserId},
    error::ApiError,
    protocol::{ConversationPayload, ServerEvent, UserGroupSettingsPayload},
};
use storage::StoredConversation;

use crate::{
    conversation_payload, ensure_edit_permission, ensure_participant, internal, is_admin,
    load_conversation, ApiContext,
};

fn ensure_group(conversation: &StoredConversation) -> Result<(), ApiError> {
    if conversation.kind != ConversationKind::Group {
        return Err(ApiError::invalid_operation(
            "direct conversations cannot be modified",
        ));
    }
    Ok(())
}

pub async fn add_members(
    ctx: &ApiContext,
    actor_id: UserId,
    conversation_id: ConversationId,
    user_ids: &[UserId],
) -> Result<ConversationPayload, ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_group(&conversation)?;
    ensure_edit_permission(ctx, &conversation, actor_id).await?;

    let _guard = ctx.locks.acquire(conversation_id).await;
    let existing = ctx
        .storage
        .participants(conversation_id)
        .await
        .map_err(internal)?;
    let mut added = Vec::new();
    for user_id in user_ids {
        if !existing.contains(user_id) && !added.contains(user_id) {
            added.push(*user_id);
        }
    }
    ctx.storage
        .add_participants(conversation_id, &added)
        .await
        .map_err(internal)?;

    let payload = conversation_payload(ctx, &conversation).await?;
    if !added.is_empty() {
        ctx.hub.broadcast(
            conversation_id,
            &ServerEvent::MembersAdded {
                conversation_id,
                added,
            },
            None,
        );
    }
    Ok(payload)
}

/// Set-difference removal. The creator is silently dropped from the removal
/// set rather than rejected; the broadcast carries the ids actually removed.
pub async fn remove_members(
    ctx: &ApiContext,
    actor_id: UserId,
    conversation_id: ConversationId,
    user_ids: &[UserId],
) -> Result<ConversationPayload, ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_group(&conversation)?;
    ensure_edit_permission(ctx, &conversation, actor_id).await?;

    let _guard = ctx.locks.acquire(conversation_id).await;
    let existing = ctx
        .storage
        .participants(conversation_id)
        .await
        .map_err(internal)?;
    let mut removed = Vec::new();
    for user_id in user_ids {
        if *user_id == conversation.created_by {
            continue;
        }
        if existing.contains(user_id) && !removed.contains(user_id) {
            removed.push(*user_id);
        }
    }
    ctx.storage
        .remove_participants(conversation_id, &removed)
        .await
        .map_err(internal)?;

    let payload = conversation_payload(ctx, &conversation).await?;
    if !removed.is_empty() {
        ctx.hub.broadcast(
            conversation_id,
            &ServerEvent::MembersRemoved {
                conversation_id,
                removed,
            },
            None,
        );
    }
    Ok(payload)
}

pub async fn leave(
    ctx: &ApiContext,
    actor_id: UserId,
    conversation_id: ConversationId,
) -> Result<(), ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_group(&conversation)?;
    ensure_participant(ctx, conversation_id, actor_id).await?;
    if conversation.created_by == actor_id {
        return Err(ApiError::invalid_operation(
            "creator cannot leave the group",
        ));
    }

    let _guard = ctx.locks.acquire(conversation_id).await;
    ctx.storage
        .remove_participants(conversation_id, &[actor_id])
        .await
        .map_err(internal)?;
    ctx.hub.broadcast(
        conversation_id,
        &ServerEvent::MembersRemoved {
            conversation_id,
            removed: vec![actor_id],
        },
        None,
    );
    Ok(())
}

pub async fn update_settings(
    ctx: &ApiContext,
    actor_id: UserId,
    conversation_id: ConversationId,
    only_admin_can_send: Option<bool>,
    only_admin_can_edit: Option<bool>,
) -> Result<ConversationPayload, ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_group(&conversation)?;
    if !is_admin(ctx, &conversation, actor_id).await? {
        return Err(ApiError::forbidden("Admin only"));
    }

    let _guard = ctx.locks.acquire(conversation_id).await;
    ctx.storage
        .update_settings(conversation_id, only_admin_can_send, only_admin_can_edit)
        .await
        .map_err(internal)?;
    let refreshed = load_conversation(ctx, conversation_id).await?;
    let payload = conversation_payload(ctx, &refreshed).await?;
    ctx.hub.broadcast(
        conversation_id,
        &ServerEvent::SettingsUpdated {
            conversation_id,
            conversation: payload.clone(),
        },
        None,
    );
    Ok(payload)
}

pub async fn update_metadata(
    ctx: &ApiContext,
    actor_id: UserId,
    conversation_id: ConversationId,
    name: Option<String>,
    description: Option<String>,
    avatar: Option<String>,
) -> Result<ConversationPayload, ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_group(&conversation)?;
    ensure_edit_permission(ctx, &conversation, actor_id).await?;
    if let Some(name) = name.as_deref() {
        if name.trim().is_empty() {
            return Err(ApiError::invalid_argument("group name cannot be empty"));
        }
    }

    let _guard = ctx.locks.acquire(conversation_id).await;
    ctx.storage
        .update_metadata(
            conversation_id,
            name.as_deref(),
            description.as_deref(),
            avatar.as_deref(),
        )
        .await
        .map_err(internal)?;
    let refreshed = load_conversation(ctx, conversation_id).await?;
    let payload = conversation_payload(ctx, &refreshed).await?;
    ctx.hub.broadcast(
        conversation_id,
        &ServerEvent::ConversationUpdated {
            conversation_id,
            conversation: payload.clone(),
        },
        None,
    );
    Ok(payload)
}

/// Per-user mute state. The settings row outlives membership on purpose;
/// readers only consult it for current participants.
pub async fn mute(
    ctx: &ApiContext,
    actor_id: UserId,
    conversation_id: ConversationId,
    until: Option<DateTime<Utc>>,
) -> Result<UserGroupSettingsPayload, ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_group(&conversation)?;
    ensure_participant(ctx, conversation_id, actor_id).await?;
    let stored = ctx
        .storage
        .upsert_group_settings(conversation_id, actor_id, true, until)
        .await
        .map_err(internal)?;
    Ok(group_settings_payload(stored))
}

pub async fn unmute(
    ctx: &ApiContext,
    actor_id: UserId,
    conversation_id: ConversationId,
) -> Result<UserGroupSettingsPayload, ApiError> {
    let conversation = load_conversation(ctx, conversation_id).await?;
    ensure_group(&conversation)?;
    ensure_participant(ctx, conversation_id, actor_id).await?;
    let stored = ctx
        .storage
        .upsert_group_settings(conversation_id, actor_id, false, None)
        .await
        .map_err(internal)?;
    Ok(group_settings_payload(stored))
}

fn group_settings_payload(stored: storage::StoredGroupSettings) -> UserGroupSettingsPayload {
    UserGroupSettingsPayload {
        conversation_id: stored.conversation_id,
        user_id: stored.user_id,
        muted: stored.muted,
        mute_until: stored.mute_until,
    }
}

#[cfg(test)]
#[path = "tests/membership_tests.rs"]
mod tests;
