use super::*;
use crate::messages::send_message;
use presence::PresenceHub;
use shared::error::ErrorCode;
use shared::protocol::ServerEvent;
use storage::Storage;

async fn setup() -> (ApiContext, UserId, UserId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_user("alice", None).await.expect("alice");
    let bob = storage.create_user("bob", None).await.expect("bob");
    (ApiContext::new(storage, PresenceHub::new()), alice, bob)
}

#[tokio::test]
async fn direct_conversation_is_reused_for_the_same_pair() {
    let (ctx, alice, bob) = setup().await;
    let first = create_direct(&ctx, alice, bob).await.expect("create");
    let second = create_direct(&ctx, bob, alice).await.expect("reuse");
    assert_eq!(first.id, second.id);

    let ids: Vec<UserId> = first.participants.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![alice, bob]);
}

#[tokio::test]
async fn direct_conversation_rejects_self_and_unknown_peers() {
    let (ctx, alice, _bob) = setup().await;

    let err = create_direct(&ctx, alice, alice).await.expect_err("self");
    assert!(matches!(err.code, ErrorCode::InvalidArgument));

    let err = create_direct(&ctx, alice, UserId(9999))
        .await
        .expect_err("unknown peer");
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn group_creation_requires_a_name_and_seeds_the_creator() {
    let (ctx, alice, bob) = setup().await;

    let err = create_group(&ctx, alice, "   ", None, None, &[bob])
        .await
        .expect_err("blank name");
    assert!(matches!(err.code, ErrorCode::InvalidArgument));

    let payload = create_group(&ctx, alice, "devs", Some("work"), None, &[bob])
        .await
        .expect("create");
    assert_eq!(payload.created_by, alice);
    assert_eq!(payload.admins, vec![alice]);
    let ids: Vec<UserId> = payload.participants.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![alice, bob]);
}

#[tokio::test]
async fn join_returns_snapshot_and_registers_the_session_for_fanout() {
    let (ctx, alice, bob) = setup().await;
    let conversation = ctx.storage.create_direct(alice, bob).await.expect("direct");
    send_message(&ctx, bob, conversation, Some("earlier".into()), None, None, None)
        .await
        .expect("history");

    let (session, mut rx) = ctx.hub.registry().connect(alice);
    let snapshot = join_conversation(&ctx, session, alice, conversation, 50)
        .await
        .expect("join");
    assert_eq!(snapshot.conversation.id, conversation);
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].content.as_deref(), Some("earlier"));
    assert_eq!(snapshot.messages[0].sender_name.as_deref(), Some("bob"));
    assert!(ctx.hub.registry().is_member(session, conversation));

    send_message(&ctx, bob, conversation, Some("live".into()), None, None, None)
        .await
        .expect("live send");
    match rx.try_recv().expect("event") {
        ServerEvent::MessageNew(message) => {
            assert_eq!(message.content.as_deref(), Some("live"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn join_rejects_outsiders_and_unknown_conversations() {
    let (ctx, alice, bob) = setup().await;
    let mallory = ctx.storage.create_user("mallory", None).await.expect("user");
    let conversation = ctx.storage.create_direct(alice, bob).await.expect("direct");

    let (session, _rx) = ctx.hub.registry().connect(mallory);
    let err = join_conversation(&ctx, session, mallory, conversation, 50)
        .await
        .expect_err("outsider");
    assert!(matches!(err.code, ErrorCode::Forbidden));
    assert!(!ctx.hub.registry().is_member(session, conversation));

    let err = join_conversation(&ctx, session, mallory, ConversationId(9999), 50)
        .await
        .expect_err("missing conversation");
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn subscribe_attaches_the_session_without_history() {
    let (ctx, alice, bob) = setup().await;
    let conversation = ctx.storage.create_direct(alice, bob).await.expect("direct");

    let (session, mut rx) = ctx.hub.registry().connect(alice);
    subscribe(&ctx, session, alice, conversation)
        .await
        .expect("subscribe");

    send_message(&ctx, bob, conversation, Some("summary".into()), None, None, None)
        .await
        .expect("send");
    assert!(matches!(
        rx.try_recv().expect("event"),
        ServerEvent::MessageNew(_)
    ));
}

#[tokio::test]
async fn conversation_list_carries_unread_counts_and_last_message() {
    let (ctx, alice, bob) = setup().await;
    let quiet = ctx.storage.create_direct(alice, bob).await.expect("quiet");
    let busy = create_group(&ctx, bob, "busy", None, None, &[alice])
        .await
        .expect("busy")
        .id;

    send_message(&ctx, bob, busy, Some("first".into()), None, None, None)
        .await
        .expect("send");
    send_message(&ctx, bob, busy, Some("second".into()), None, None, None)
        .await
        .expect("send");

    let conversations = list_conversations(&ctx, alice).await.expect("list");
    assert_eq!(conversations.len(), 2);
    // most recent activity first
    assert_eq!(conversations[0].id, busy);
    assert_eq!(conversations[0].unread_count, Some(2));
    assert_eq!(
        conversations[0]
            .last_message
            .as_ref()
            .expect("last message")
            .content
            .as_deref(),
        Some("second")
    );
    assert_eq!(conversations[1].id, quiet);
    assert_eq!(conversations[1].unread_count, Some(0));
    assert!(conversations[1].last_message.is_none());
}

#[tokio::test]
async fn get_conversation_is_participant_gated() {
    let (ctx, alice, bob) = setup().await;
    let mallory = ctx.storage.create_user("mallory", None).await.expect("user");
    let conversation = ctx.storage.create_direct(alice, bob).await.expect("direct");

    get_conversation(&ctx, alice, conversation)
        .await
        .expect("participant");
    let err = get_conversation(&ctx, mallory, conversation)
        .await
        .expect_err("outsider");
    assert!(matches!(err.code, ErrorCode::Forbidden));
}

#[tokio::test]
async fn profile_updates_trim_and_persist() {
    let (ctx, alice, _bob) = setup().await;

    let updated = update_profile(
        &ctx,
        alice,
        Some("  alicia  ".into()),
        Some("https://cdn.example/alicia.png".into()),
    )
    .await
    .expect("update");
    assert_eq!(updated.name, "alicia");
    assert_eq!(updated.avatar.as_deref(), Some("https://cdn.example/alicia.png"));

    let err = update_profile(&ctx, alice, Some("   ".into()), None)
        .await
        .expect_err("blank name");
    assert!(matches!(err.code, ErrorCode::InvalidArgument));

    let err = update_profile(&ctx, UserId(9999), Some("ghost".into()), None)
        .await
        .expect_err("unknown user");
    assert!(matches!(err.code, ErrorCode::Unauthorized));
}
