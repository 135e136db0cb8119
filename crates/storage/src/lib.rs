use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{ConversationId, ConversationKind, MessageId, UserId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredConversation {
    pub conversation_id: ConversationId,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub created_by: UserId,
    pub only_admin_can_send: bool,
    pub only_admin_can_edit: bool,
    pub last_message_id: Option<MessageId>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredReplyPreview {
    pub sender_name: String,
    pub content: Option<String>,
    pub has_attachment: bool,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub reply_to: Option<MessageId>,
    pub reply_preview: Option<StoredReplyPreview>,
    pub forwarded_from_user: Option<UserId>,
    pub forwarded_from_conversation: Option<ConversationId>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub read_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub reply_to: Option<MessageId>,
    pub reply_preview: Option<StoredReplyPreview>,
    pub forwarded_from_user: Option<UserId>,
    pub forwarded_from_conversation: Option<ConversationId>,
}

#[derive(Debug, Clone)]
pub struct StoredGroupSettings {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub muted: bool,
    pub mute_until: Option<DateTime<Utc>>,
}

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.content, m.attachment, \
     m.reply_to_id, m.reply_preview_sender, m.reply_preview_content, m.reply_preview_has_attachment, \
     m.forwarded_from_user, m.forwarded_from_conversation, m.is_deleted, m.deleted_at, m.created_at, \
     (SELECT GROUP_CONCAT(r.user_id) FROM message_reads r WHERE r.message_id = m.id) AS read_by";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, name: &str, avatar: Option<&str>) -> Result<UserId> {
        let rec = sqlx::query("INSERT INTO users (name, avatar) VALUES (?, ?) RETURNING id")
            .bind(name)
            .bind(avatar)
            .fetch_one(&self.pool)
            .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query("SELECT id, name, avatar FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| StoredUser {
            user_id: UserId(r.get::<i64, _>(0)),
            name: r.get::<String, _>(1),
            avatar: r.get::<Option<String>, _>(2),
        }))
    }

    pub async fn update_user_profile(
        &self,
        user_id: UserId,
        name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE users SET name = COALESCE(?, name), avatar = COALESCE(?, avatar) WHERE id = ?",
        )
        .bind(name)
        .bind(avatar)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_direct(&self, a: UserId, b: UserId) -> Result<ConversationId> {
        let mut tx = self.pool.begin().await?;
        let rec = sqlx::query(
            "INSERT INTO conversations (kind, created_by) VALUES ('direct', ?) RETURNING id",
        )
        .bind(a.0)
        .fetch_one(&mut *tx)
        .await?;
        let conversation_id = ConversationId(rec.get::<i64, _>(0));
        for user in [a, b] {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?, ?)",
            )
            .bind(conversation_id.0)
            .bind(user.0)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(conversation_id)
    }

    pub async fn find_direct(&self, a: UserId, b: UserId) -> Result<Option<ConversationId>> {
        let row = sqlx::query(
            "SELECT c.id FROM conversations c
             WHERE c.kind = 'direct'
               AND EXISTS (SELECT 1 FROM conversation_participants p
                           WHERE p.conversation_id = c.id AND p.user_id = ?)
               AND EXISTS (SELECT 1 FROM conversation_participants p
                           WHERE p.conversation_id = c.id AND p.user_id = ?)
             LIMIT 1",
        )
        .bind(a.0)
        .bind(b.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| ConversationId(r.get::<i64, _>(0))))
    }

    pub async fn create_group(
        &self,
        creator: UserId,
        name: &str,
        description: Option<&str>,
        avatar: Option<&str>,
        members: &[UserId],
    ) -> Result<ConversationId> {
        let mut tx = self.pool.begin().await?;
        let rec = sqlx::query(
            "INSERT INTO conversations (kind, name, description, avatar, created_by)
             VALUES ('group', ?, ?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(description)
        .bind(avatar)
        .bind(creator.0)
        .fetch_one(&mut *tx)
        .await?;
        let conversation_id = ConversationId(rec.get::<i64, _>(0));

        let mut participants = vec![creator];
        for member in members {
            if !participants.contains(member) {
                participants.push(*member);
            }
        }
        for user in &participants {
            sqlx::query(
                "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id) VALUES (?, ?)",
            )
            .bind(conversation_id.0)
            .bind(user.0)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT OR IGNORE INTO group_memberships (conversation_id, user_id) VALUES (?, ?)",
            )
            .bind(conversation_id.0)
            .bind(user.0)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("INSERT INTO conversation_admins (conversation_id, user_id) VALUES (?, ?)")
            .bind(conversation_id.0)
            .bind(creator.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(conversation_id)
    }

    pub async fn conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<StoredConversation>> {
        let row = sqlx::query(
            "SELECT id, kind, name, description, avatar, created_by, only_admin_can_send,
                    only_admin_can_edit, last_message_id, last_activity_at
             FROM conversations WHERE id = ?",
        )
        .bind(conversation_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(conversation_from_row))
    }

    pub async fn participants(&self, conversation_id: ConversationId) -> Result<Vec<UserId>> {
        let rows = sqlx::query(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = ? ORDER BY user_id",
        )
        .bind(conversation_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| UserId(r.get::<i64, _>(0))).collect())
    }

    pub async fn is_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn admins(&self, conversation_id: ConversationId) -> Result<Vec<UserId>> {
        let rows = sqlx::query(
            "SELECT user_id FROM conversation_admins WHERE conversation_id = ? ORDER BY user_id",
        )
        .bind(conversation_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| UserId(r.get::<i64, _>(0))).collect())
    }

    pub async fn participant_summaries(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query(
            "SELECT u.id, u.name, u.avatar
             FROM conversation_participants p
             INNER JOIN users u ON u.id = p.user_id
             WHERE p.conversation_id = ?
             ORDER BY lower(u.name) ASC",
        )
        .bind(conversation_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredUser {
                user_id: UserId(r.get::<i64, _>(0)),
                name: r.get::<String, _>(1),
                avatar: r.get::<Option<String>, _>(2),
            })
            .collect())
    }

    pub async fn list_conversations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<StoredConversation>> {
        let rows = sqlx::query(
            "SELECT c.id, c.kind, c.name, c.description, c.avatar, c.created_by,
                    c.only_admin_can_send, c.only_admin_can_edit, c.last_message_id, c.last_activity_at
             FROM conversations c
             INNER JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?
             ORDER BY c.last_activity_at DESC, c.id DESC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(conversation_from_row).collect())
    }

    /// Set-union merge: already-present users are ignored, GroupMembership
    /// rows are upserted in step.
    pub async fn add_participants(
        &self,
        conversation_id: ConversationId,
        user_ids: &[UserId],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for user in user_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id) VALUES (?, ?)",
            )
            .bind(conversation_id.0)
            .bind(user.0)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT OR IGNORE INTO group_memberships (conversation_id, user_id) VALUES (?, ?)",
            )
            .bind(conversation_id.0)
            .bind(user.0)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_participants(
        &self,
        conversation_id: ConversationId,
        user_ids: &[UserId],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for user in user_ids {
            sqlx::query(
                "DELETE FROM conversation_participants WHERE conversation_id = ? AND user_id = ?",
            )
            .bind(conversation_id.0)
            .bind(user.0)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "DELETE FROM group_memberships WHERE conversation_id = ? AND user_id = ?",
            )
            .bind(conversation_id.0)
            .bind(user.0)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "DELETE FROM conversation_admins WHERE conversation_id = ? AND user_id = ?",
            )
            .bind(conversation_id.0)
            .bind(user.0)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn group_membership_exists(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM group_memberships WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn update_settings(
        &self,
        conversation_id: ConversationId,
        only_admin_can_send: Option<bool>,
        only_admin_can_edit: Option<bool>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations
             SET only_admin_can_send = COALESCE(?, only_admin_can_send),
                 only_admin_can_edit = COALESCE(?, only_admin_can_edit)
             WHERE id = ?",
        )
        .bind(only_admin_can_send)
        .bind(only_admin_can_edit)
        .bind(conversation_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_metadata(
        &self,
        conversation_id: ConversationId,
        name: Option<&str>,
        description: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations
             SET name = COALESCE(?, name),
                 description = COALESCE(?, description),
                 avatar = COALESCE(?, avatar)
             WHERE id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(avatar)
        .bind(conversation_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Last-writer-wins summary refresh; last activity is a display hint.
    pub async fn set_last_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations
             SET last_message_id = ?, last_activity_at = CURRENT_TIMESTAMP
             WHERE id = ?",
        )
        .bind(message_id.0)
        .bind(conversation_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_message(&self, new: &NewMessage) -> Result<MessageId> {
        let rec = sqlx::query(
            "INSERT INTO messages (conversation_id, sender_id, content, attachment, reply_to_id,
                                   reply_preview_sender, reply_preview_content,
                                   reply_preview_has_attachment, forwarded_from_user,
                                   forwarded_from_conversation)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(new.conversation_id.0)
        .bind(new.sender_id.0)
        .bind(new.content.as_deref())
        .bind(new.attachment.as_deref())
        .bind(new.reply_to.map(|id| id.0))
        .bind(new.reply_preview.as_ref().map(|p| p.sender_name.as_str()))
        .bind(new.reply_preview.as_ref().and_then(|p| p.content.as_deref()))
        .bind(new.reply_preview.as_ref().map(|p| p.has_attachment))
        .bind(new.forwarded_from_user.map(|id| id.0))
        .bind(new.forwarded_from_conversation.map(|id| id.0))
        .fetch_one(&self.pool)
        .await?;
        Ok(MessageId(rec.get::<i64, _>(0)))
    }

    pub async fn load_message(&self, message_id: MessageId) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?"
        ))
        .bind(message_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(message_from_row))
    }

    /// The viewer's window onto the conversation: rows the viewer has hidden
    /// are excluded, redacted rows stay as tombstones. Newest page first in
    /// the query, returned oldest first.
    pub async fn list_messages(
        &self,
        conversation_id: ConversationId,
        viewer: UserId,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<StoredMessage>> {
        let mut rows = if let Some(before_id) = before {
            sqlx::query(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.conversation_id = ? AND m.id < ?
                   AND NOT EXISTS (SELECT 1 FROM message_hidden h
                                   WHERE h.message_id = m.id AND h.user_id = ?)
                 ORDER BY m.id DESC
                 LIMIT ?"
            ))
            .bind(conversation_id.0)
            .bind(before_id)
            .bind(viewer.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.conversation_id = ?
                   AND NOT EXISTS (SELECT 1 FROM message_hidden h
                                   WHERE h.message_id = m.id AND h.user_id = ?)
                 ORDER BY m.id DESC
                 LIMIT ?"
            ))
            .bind(conversation_id.0)
            .bind(viewer.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        rows.reverse();
        Ok(rows.into_iter().map(message_from_row).collect())
    }

    pub async fn hide_for_user(&self, message_ids: &[MessageId], user_id: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for message in message_ids {
            sqlx::query("INSERT OR IGNORE INTO message_hidden (message_id, user_id) VALUES (?, ?)")
                .bind(message.0)
                .bind(user_id.0)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn unhide_for_user(&self, message_ids: &[MessageId], user_id: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for message in message_ids {
            sqlx::query("DELETE FROM message_hidden WHERE message_id = ? AND user_id = ?")
                .bind(message.0)
                .bind(user_id.0)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn is_hidden_for(&self, message_id: MessageId, user_id: UserId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM message_hidden WHERE message_id = ? AND user_id = ?")
            .bind(message_id.0)
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Global redaction: the row persists as a tombstone with its content and
    /// attachment erased.
    pub async fn redact_messages(&self, message_ids: &[MessageId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for message in message_ids {
            sqlx::query(
                "UPDATE messages
                 SET is_deleted = 1, content = NULL, attachment = NULL,
                     deleted_at = CURRENT_TIMESTAMP
                 WHERE id = ?",
            )
            .bind(message.0)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Adds the user to the read set of every unread message they did not
    /// send. Single statement, safe to repeat.
    pub async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Vec<MessageId>> {
        let rows = sqlx::query(
            "INSERT INTO message_reads (message_id, user_id)
             SELECT m.id, ?2 FROM messages m
             WHERE m.conversation_id = ?1 AND m.sender_id != ?2
               AND NOT EXISTS (SELECT 1 FROM message_reads r
                               WHERE r.message_id = m.id AND r.user_id = ?2)
             RETURNING message_id",
        )
        .bind(conversation_id.0)
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| MessageId(r.get::<i64, _>(0))).collect())
    }

    pub async fn unread_count(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m
             WHERE m.conversation_id = ?1 AND m.sender_id != ?2 AND m.is_deleted = 0
               AND NOT EXISTS (SELECT 1 FROM message_reads r
                               WHERE r.message_id = m.id AND r.user_id = ?2)
               AND NOT EXISTS (SELECT 1 FROM message_hidden h
                               WHERE h.message_id = m.id AND h.user_id = ?2)",
        )
        .bind(conversation_id.0)
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn upsert_group_settings(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        muted: bool,
        mute_until: Option<DateTime<Utc>>,
    ) -> Result<StoredGroupSettings> {
        let row = sqlx::query(
            "INSERT INTO user_group_settings (conversation_id, user_id, muted, mute_until, updated_at)
             VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(conversation_id, user_id) DO UPDATE SET
                 muted = excluded.muted,
                 mute_until = excluded.mute_until,
                 updated_at = CURRENT_TIMESTAMP
             RETURNING conversation_id, user_id, muted, mute_until",
        )
        .bind(conversation_id.0)
        .bind(user_id.0)
        .bind(muted)
        .bind(mute_until)
        .fetch_one(&self.pool)
        .await?;
        Ok(group_settings_from_row(row))
    }

    pub async fn group_settings(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Option<StoredGroupSettings>> {
        let row = sqlx::query(
            "SELECT conversation_id, user_id, muted, mute_until
             FROM user_group_settings
             WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(group_settings_from_row))
    }
}

fn conversation_from_row(r: sqlx::sqlite::SqliteRow) -> StoredConversation {
    let kind = match r.get::<String, _>(1).as_str() {
        "group" => ConversationKind::Group,
        _ => ConversationKind::Direct,
    };
    StoredConversation {
        conversation_id: ConversationId(r.get::<i64, _>(0)),
        kind,
        name: r.get::<Option<String>, _>(2),
        description: r.get::<Option<String>, _>(3),
        avatar: r.get::<Option<String>, _>(4),
        created_by: UserId(r.get::<i64, _>(5)),
        only_admin_can_send: r.get::<bool, _>(6),
        only_admin_can_edit: r.get::<bool, _>(7),
        last_message_id: r.get::<Option<i64>, _>(8).map(MessageId),
        last_activity_at: r.get::<DateTime<Utc>, _>(9),
    }
}

fn message_from_row(r: sqlx::sqlite::SqliteRow) -> StoredMessage {
    let reply_preview = r
        .get::<Option<String>, _>(6)
        .map(|sender_name| StoredReplyPreview {
            sender_name,
            content: r.get::<Option<String>, _>(7),
            has_attachment: r.get::<Option<bool>, _>(8).unwrap_or(false),
        });
    StoredMessage {
        message_id: MessageId(r.get::<i64, _>(0)),
        conversation_id: ConversationId(r.get::<i64, _>(1)),
        sender_id: UserId(r.get::<i64, _>(2)),
        content: r.get::<Option<String>, _>(3),
        attachment: r.get::<Option<String>, _>(4),
        reply_to: r.get::<Option<i64>, _>(5).map(MessageId),
        reply_preview,
        forwarded_from_user: r.get::<Option<i64>, _>(9).map(UserId),
        forwarded_from_conversation: r.get::<Option<i64>, _>(10).map(ConversationId),
        is_deleted: r.get::<bool, _>(11),
        deleted_at: r.get::<Option<DateTime<Utc>>, _>(12),
        created_at: r.get::<DateTime<Utc>, _>(13),
        read_by: parse_id_list(r.get::<Option<String>, _>(14)),
    }
}

fn group_settings_from_row(r: sqlx::sqlite::SqliteRow) -> StoredGroupSettings {
    StoredGroupSettings {
        conversation_id: ConversationId(r.get::<i64, _>(0)),
        user_id: UserId(r.get::<i64, _>(1)),
        muted: r.get::<bool, _>(2),
        mute_until: r.get::<Option<DateTime<Utc>>, _>(3),
    }
}

fn parse_id_list(raw: Option<String>) -> Vec<UserId> {
    raw.map(|joined| {
        joined
            .split(',')
            .filter_map(|part| part.parse::<i64>().ok())
            .map(UserId)
            .collect()
    })
    .unwrap_or_default()
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
