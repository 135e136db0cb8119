use super::*;
use presence::PresenceHub;
use shared::domain::MessageId;
use shared::error::ErrorCode;
use storage::{NewMessage, Storage};

async fn setup() -> (ApiContext, UserId, UserId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_user("alice", None).await.expect("alice");
    let bob = storage.create_user("bob", None).await.expect("bob");
    (ApiContext::new(storage, PresenceHub::new()), alice, bob)
}

async fn insert_text(
    ctx: &ApiContext,
    conversation_id: ConversationId,
    sender_id: UserId,
    text: &str,
) -> MessageId {
    ctx.storage
        .insert_message(&NewMessage {
            conversation_id,
            sender_id,
            content: Some(text.to_string()),
            attachment: None,
            reply_to: None,
            reply_preview: None,
            forwarded_from_user: None,
            forwarded_from_conversation: None,
        })
        .await
        .expect("message")
}

#[tokio::test]
async fn mark_read_is_idempotent() {
    let (ctx, alice, bob) = setup().await;
    let conversation = ctx.storage.create_direct(alice, bob).await.expect("direct");
    let first = insert_text(&ctx, conversation, bob, "one").await;
    let second = insert_text(&ctx, conversation, bob, "two").await;
    insert_text(&ctx, conversation, alice, "own message").await;

    assert_eq!(mark_read(&ctx, alice, conversation).await.expect("read"), 2);
    assert_eq!(mark_read(&ctx, alice, conversation).await.expect("read"), 0);

    for message in [first, second] {
        let stored = ctx
            .storage
            .load_message(message)
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(stored.read_by, vec![alice]);
    }
    assert_eq!(
        ctx.storage
            .unread_count(conversation, alice)
            .await
            .expect("count"),
        0
    );
}

#[tokio::test]
async fn read_reset_reaches_only_the_readers_own_sessions() {
    let (ctx, alice, bob) = setup().await;
    let conversation = ctx.storage.create_direct(alice, bob).await.expect("direct");
    insert_text(&ctx, conversation, bob, "unread").await;

    let (alice_phone, mut phone_rx) = ctx.hub.registry().connect(alice);
    let (alice_tablet, mut tablet_rx) = ctx.hub.registry().connect(alice);
    let (bob_session, mut bob_rx) = ctx.hub.registry().connect(bob);
    for session in [alice_phone, alice_tablet, bob_session] {
        ctx.hub.registry().join(session, conversation);
    }

    mark_read(&ctx, alice, conversation).await.expect("read");

    for rx in [&mut phone_rx, &mut tablet_rx] {
        match rx.try_recv().expect("event") {
            ServerEvent::ConversationRead {
                conversation_id,
                user_id,
            } => {
                assert_eq!(conversation_id, conversation);
                assert_eq!(user_id, alice);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(bob_rx.try_recv().is_err(), "read reset is not fanned out");
}

#[tokio::test]
async fn mark_read_requires_an_existing_conversation_and_membership() {
    let (ctx, alice, bob) = setup().await;
    let mallory = ctx.storage.create_user("mallory", None).await.expect("user");
    let conversation = ctx.storage.create_direct(alice, bob).await.expect("direct");

    let err = mark_read(&ctx, mallory, conversation)
        .await
        .expect_err("outsider");
    assert!(matches!(err.code, ErrorCode::Forbidden));

    let err = mark_read(&ctx, alice, ConversationId(9999))
        .await
        .expect_err("missing conversation");
    assert!(matches!(err.code, ErrorCode::NotFound));
}
