//! ReadTracker: per-user read state with an aggregate reset event. Read
//! receipts are not fanned out per message; only the acting user's own
//! sessions are told to zero their unread counters.

use shared::{
    domain::{ConversationId, UserId},
    error::ApiError,
    protocol::ServerEvent,
};

use crate::{ensure_participant, internal, load_conversation, ApiContext};

/// Marks every unread message not sent by `user_id` as read. Safe to call
/// repeatedly; returns how many messages became read this time.
pub async fn mark_read(
    ctx: &ApiContext,
    user_id: UserId,
    conversation_id: ConversationId,
) -> Result<usize, ApiError> {
    load_conversation(ctx, conversation_id).await?;
    ensure_participant(ctx, conversation_id, user_id).await?;

    let newly_read = ctx
        .storage
        .mark_read(conversation_id, user_id)
        .await
        .map_err(internal)?;
    ctx.hub.send_to_user(
        user_id,
        &ServerEvent::ConversationRead {
            conversation_id,
            user_id,
        },
    );
    Ok(newly_read.len())
}

#[cfg(test)]
#[path = "tests/read_tests.rs"]
mod tests;
