use super::*;

async fn setup() -> (Storage, UserId, UserId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_user("alice", None).await.expect("alice");
    let bob = storage
        .create_user("bob", Some("https://cdn.example/bob.png"))
        .await
        .expect("bob");
    (storage, alice, bob)
}

fn text_message(conversation_id: ConversationId, sender_id: UserId, content: &str) -> NewMessage {
    NewMessage {
        conversation_id,
        sender_id,
        content: Some(content.to_string()),
        attachment: None,
        reply_to: None,
        reply_preview: None,
        forwarded_from_user: None,
        forwarded_from_conversation: None,
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let (storage, _, _) = setup().await;
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn direct_conversation_has_exactly_two_participants() {
    let (storage, alice, bob) = setup().await;
    let conversation = storage.create_direct(alice, bob).await.expect("direct");

    let participants = storage.participants(conversation).await.expect("participants");
    assert_eq!(participants, vec![alice, bob]);

    let found = storage.find_direct(bob, alice).await.expect("lookup");
    assert_eq!(found, Some(conversation));
}

#[tokio::test]
async fn group_creation_seeds_creator_as_participant_admin_and_member() {
    let (storage, alice, bob) = setup().await;
    let group = storage
        .create_group(alice, "devs", Some("work chat"), None, &[bob, bob])
        .await
        .expect("group");

    let participants = storage.participants(group).await.expect("participants");
    assert_eq!(participants, vec![alice, bob]);
    assert_eq!(storage.admins(group).await.expect("admins"), vec![alice]);
    assert!(storage
        .group_membership_exists(group, alice)
        .await
        .expect("membership"));
    assert!(storage
        .group_membership_exists(group, bob)
        .await
        .expect("membership"));
}

#[tokio::test]
async fn add_then_remove_participants_round_trips() {
    let (storage, alice, bob) = setup().await;
    let carol = storage.create_user("carol", None).await.expect("carol");
    let group = storage
        .create_group(alice, "devs", None, None, &[])
        .await
        .expect("group");

    storage
        .add_participants(group, &[bob, carol])
        .await
        .expect("add");
    // repeat insert is a no-op
    storage.add_participants(group, &[bob]).await.expect("re-add");
    assert_eq!(
        storage.participants(group).await.expect("participants"),
        vec![alice, bob, carol]
    );

    storage
        .remove_participants(group, &[bob, carol])
        .await
        .expect("remove");
    assert_eq!(
        storage.participants(group).await.expect("participants"),
        vec![alice]
    );
    assert!(!storage
        .group_membership_exists(group, bob)
        .await
        .expect("membership"));
}

#[tokio::test]
async fn paginates_messages_for_viewer() {
    let (storage, alice, bob) = setup().await;
    let conversation = storage.create_direct(alice, bob).await.expect("direct");

    let first = storage
        .insert_message(&text_message(conversation, alice, "first"))
        .await
        .expect("first");
    let second = storage
        .insert_message(&text_message(conversation, bob, "second"))
        .await
        .expect("second");
    let _third = storage
        .insert_message(&text_message(conversation, alice, "third"))
        .await
        .expect("third");

    let newest_two = storage
        .list_messages(conversation, alice, 2, None)
        .await
        .expect("messages");
    assert_eq!(newest_two.len(), 2);
    assert_eq!(newest_two[0].message_id, second);

    let older = storage
        .list_messages(conversation, alice, 2, Some(second.0))
        .await
        .expect("messages");
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].message_id, first);
}

#[tokio::test]
async fn hidden_messages_disappear_for_the_hiding_user_only() {
    let (storage, alice, bob) = setup().await;
    let conversation = storage.create_direct(alice, bob).await.expect("direct");
    let message = storage
        .insert_message(&text_message(conversation, bob, "secret"))
        .await
        .expect("message");

    storage.hide_for_user(&[message], alice).await.expect("hide");
    // repeat hide is a no-op
    storage.hide_for_user(&[message], alice).await.expect("re-hide");

    let alice_view = storage
        .list_messages(conversation, alice, 10, None)
        .await
        .expect("alice view");
    assert!(alice_view.is_empty());

    let bob_view = storage
        .list_messages(conversation, bob, 10, None)
        .await
        .expect("bob view");
    assert_eq!(bob_view.len(), 1);
    assert_eq!(bob_view[0].content.as_deref(), Some("secret"));

    storage
        .unhide_for_user(&[message], alice)
        .await
        .expect("unhide");
    let restored = storage
        .list_messages(conversation, alice, 10, None)
        .await
        .expect("restored view");
    assert_eq!(restored.len(), 1);
}

#[tokio::test]
async fn redaction_leaves_a_tombstone_row() {
    let (storage, alice, bob) = setup().await;
    let conversation = storage.create_direct(alice, bob).await.expect("direct");
    let message = storage
        .insert_message(&NewMessage {
            attachment: Some("https://cdn.example/photo.jpg".to_string()),
            ..text_message(conversation, alice, "look at this")
        })
        .await
        .expect("message");

    storage.redact_messages(&[message]).await.expect("redact");

    let stored = storage
        .load_message(message)
        .await
        .expect("load")
        .expect("exists");
    assert!(stored.is_deleted);
    assert!(stored.content.is_none());
    assert!(stored.attachment.is_none());
    assert!(stored.deleted_at.is_some());

    // the tombstone still occupies its position in both views
    let bob_view = storage
        .list_messages(conversation, bob, 10, None)
        .await
        .expect("bob view");
    assert_eq!(bob_view.len(), 1);
    assert!(bob_view[0].is_deleted);
}

#[tokio::test]
async fn mark_read_is_idempotent_and_skips_own_messages() {
    let (storage, alice, bob) = setup().await;
    let conversation = storage.create_direct(alice, bob).await.expect("direct");
    storage
        .insert_message(&text_message(conversation, alice, "mine"))
        .await
        .expect("own message");
    let from_bob = storage
        .insert_message(&text_message(conversation, bob, "for alice"))
        .await
        .expect("incoming");

    let first_pass = storage.mark_read(conversation, alice).await.expect("read");
    assert_eq!(first_pass, vec![from_bob]);

    let second_pass = storage.mark_read(conversation, alice).await.expect("read");
    assert!(second_pass.is_empty());

    let stored = storage
        .load_message(from_bob)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(stored.read_by, vec![alice]);
}

#[tokio::test]
async fn unread_count_ignores_read_hidden_and_redacted_messages() {
    let (storage, alice, bob) = setup().await;
    let conversation = storage.create_direct(alice, bob).await.expect("direct");

    let read_one = storage
        .insert_message(&text_message(conversation, bob, "one"))
        .await
        .expect("one");
    let hidden = storage
        .insert_message(&text_message(conversation, bob, "two"))
        .await
        .expect("two");
    let redacted = storage
        .insert_message(&text_message(conversation, bob, "three"))
        .await
        .expect("three");
    let _pending = storage
        .insert_message(&text_message(conversation, bob, "four"))
        .await
        .expect("four");
    storage
        .insert_message(&text_message(conversation, alice, "own"))
        .await
        .expect("own");

    storage.mark_read(conversation, alice).await.expect("read all");
    // reset: only `read_one` stays read
    sqlx::query("DELETE FROM message_reads WHERE message_id != ?")
        .bind(read_one.0)
        .execute(storage.pool())
        .await
        .expect("trim reads");

    storage.hide_for_user(&[hidden], alice).await.expect("hide");
    storage.redact_messages(&[redacted]).await.expect("redact");

    let unread = storage.unread_count(conversation, alice).await.expect("count");
    assert_eq!(unread, 1);
}

#[tokio::test]
async fn reply_preview_and_forward_origin_persist() {
    let (storage, alice, bob) = setup().await;
    let conversation = storage.create_direct(alice, bob).await.expect("direct");
    let source = storage.create_direct(alice, bob).await.expect("source");

    let message = storage
        .insert_message(&NewMessage {
            reply_to: Some(MessageId(99)),
            reply_preview: Some(StoredReplyPreview {
                sender_name: "bob".to_string(),
                content: Some("original text".to_string()),
                has_attachment: false,
            }),
            forwarded_from_user: Some(bob),
            forwarded_from_conversation: Some(source),
            ..text_message(conversation, alice, "reply and forward")
        })
        .await
        .expect("message");

    let stored = storage
        .load_message(message)
        .await
        .expect("load")
        .expect("exists");
    let preview = stored.reply_preview.expect("preview");
    assert_eq!(preview.sender_name, "bob");
    assert_eq!(preview.content.as_deref(), Some("original text"));
    assert!(!preview.has_attachment);
    assert_eq!(stored.forwarded_from_user, Some(bob));
    assert_eq!(stored.forwarded_from_conversation, Some(source));
}

#[tokio::test]
async fn last_message_refresh_updates_summary() {
    let (storage, alice, bob) = setup().await;
    let conversation = storage.create_direct(alice, bob).await.expect("direct");
    let message = storage
        .insert_message(&text_message(conversation, alice, "latest"))
        .await
        .expect("message");

    storage
        .set_last_message(conversation, message)
        .await
        .expect("summary");

    let stored = storage
        .conversation(conversation)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(stored.last_message_id, Some(message));
}

#[tokio::test]
async fn group_settings_upsert_overwrites_previous_row() {
    let (storage, alice, bob) = setup().await;
    let group = storage
        .create_group(alice, "devs", None, None, &[bob])
        .await
        .expect("group");

    let muted = storage
        .upsert_group_settings(group, bob, true, None)
        .await
        .expect("mute");
    assert!(muted.muted);

    let unmuted = storage
        .upsert_group_settings(group, bob, false, None)
        .await
        .expect("unmute");
    assert!(!unmuted.muted);

    let loaded = storage
        .group_settings(group, bob)
        .await
        .expect("load")
        .expect("exists");
    assert!(!loaded.muted);
    assert!(loaded.mute_until.is_none());
}

#[tokio::test]
async fn settings_update_is_partial() {
    let (storage, alice, bob) = setup().await;
    let group = storage
        .create_group(alice, "devs", None, None, &[bob])
        .await
        .expect("group");

    storage
        .update_settings(group, Some(true), None)
        .await
        .expect("update send");
    let stored = storage
        .conversation(group)
        .await
        .expect("load")
        .expect("exists");
    assert!(stored.only_admin_can_send);
    assert!(!stored.only_admin_can_edit);

    storage
        .update_metadata(group, Some("renamed"), None, None)
        .await
        .expect("update name");
    let stored = storage
        .conversation(group)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(stored.name.as_deref(), Some("renamed"));
    assert_eq!(stored.description, None);
}
