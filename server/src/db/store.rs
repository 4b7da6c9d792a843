//! Data-access interface consumed by the presence and fanout core, and its
//! SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::sync::MutexGuard;

use super::DbPool;
use crate::chat::scope::{ChatId, ChatRef, ChatScope, ChatType, MessageId, UserId};
use crate::error::{StoreError, StoreResult};
use crate::presence::visibility::{VisibilityMode, VisibilitySettings};

/// Persistence operations the core calls into. Implementations are
/// synchronous; async callers go through `AppState::blocking`.
pub trait DataAccess: Send + Sync {
    /// Resolve a chat and its live, active membership. `None` if the chat
    /// does not exist.
    fn load_scope(&self, chat: ChatRef) -> StoreResult<Option<ChatScope>>;

    /// Privacy settings for `user_id`, or the defaults when none are stored.
    fn get_visibility_settings(&self, user_id: UserId) -> StoreResult<VisibilitySettings>;

    /// Insert or refresh one receipt. Returns true when it did not exist.
    fn upsert_read_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(!self
            .upsert_read_receipts(&[message_id], user_id, at)?
            .is_empty())
    }

    /// Upsert a batch of receipts atomically and return the ids that were
    /// newly created. Existing receipts only have `read_at` refreshed.
    fn upsert_read_receipts(
        &self,
        message_ids: &[MessageId],
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<MessageId>>;

    /// Messages in `chat` authored by someone else that `user_id` has no
    /// receipt for, oldest first.
    fn get_unread_message_ids(&self, chat: ChatRef, user_id: UserId)
        -> StoreResult<Vec<MessageId>>;

    fn set_user_online(
        &self,
        user_id: UserId,
        location: Option<&str>,
        session_id: Option<&str>,
    ) -> StoreResult<()>;

    fn set_user_offline(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()>;

    fn get_username(&self, user_id: UserId) -> StoreResult<Option<String>>;

    fn get_last_seen(&self, user_id: UserId) -> StoreResult<Option<DateTime<Utc>>>;

    /// `(message, sender)` pairs for the ids that belong to `chat`. Ids from
    /// other chats are silently dropped.
    fn get_message_senders(
        &self,
        chat: ChatRef,
        message_ids: &[MessageId],
    ) -> StoreResult<Vec<(MessageId, UserId)>>;

    /// Groups in which `user_id` is an active member.
    fn get_user_group_ids(&self, user_id: UserId) -> StoreResult<Vec<ChatId>>;
}

/// `DataAccess` backed by the shared rusqlite connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// The underlying connection, for collaborators that own the chat tables.
    pub fn pool(&self) -> &DbPool {
        &self.db
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn decode_id_set(raw: &str, column: &str) -> StoreResult<HashSet<UserId>> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode(format!("{column}: {e}")))
}

fn decode_string_set(raw: &str, column: &str) -> StoreResult<HashSet<String>> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode(format!("{column}: {e}")))
}

fn member_ids(conn: &Connection, sql: &str, chat_id: ChatId) -> StoreResult<HashSet<UserId>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let ids = stmt
        .query_map(params![chat_id], |row| row.get::<_, UserId>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

impl DataAccess for SqliteStore {
    fn load_scope(&self, chat: ChatRef) -> StoreResult<Option<ChatScope>> {
        let conn = self.conn()?;

        match chat.chat_type {
            ChatType::Private => {
                let pair = conn
                    .query_row(
                        "SELECT participant1, participant2 FROM private_chats WHERE id = ?1",
                        params![chat.chat_id],
                        |row| Ok((row.get::<_, UserId>(0)?, row.get::<_, UserId>(1)?)),
                    )
                    .optional()?;
                Ok(pair.map(|(participant1, participant2)| ChatScope::Private {
                    chat_id: chat.chat_id,
                    participant1,
                    participant2,
                }))
            }
            ChatType::Group => {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM chat_groups WHERE id = ?1",
                        params![chat.chat_id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if !exists {
                    return Ok(None);
                }
                let member_ids = member_ids(
                    &conn,
                    "SELECT user_id FROM group_members WHERE group_id = ?1 AND is_active = 1",
                    chat.chat_id,
                )?;
                Ok(Some(ChatScope::Group {
                    group_id: chat.chat_id,
                    member_ids,
                }))
            }
            ChatType::Channel => {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM channels WHERE id = ?1",
                        params![chat.chat_id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if !exists {
                    return Ok(None);
                }
                let member_ids = member_ids(
                    &conn,
                    "SELECT user_id FROM channel_members WHERE channel_id = ?1 AND is_active = 1",
                    chat.chat_id,
                )?;
                let poster_ids = member_ids_with_role(&conn, chat.chat_id)?;
                Ok(Some(ChatScope::Channel {
                    channel_id: chat.chat_id,
                    member_ids,
                    poster_ids,
                }))
            }
        }
    }

    fn get_visibility_settings(&self, user_id: UserId) -> StoreResult<VisibilitySettings> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT mode, show_online_status, hidden_from_users, visible_to_users, allowed_locations
                 FROM privacy_settings WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((mode, show_online_status, hidden, visible, locations)) = row else {
            return Ok(VisibilitySettings::default());
        };

        let mode = VisibilityMode::from_str(&mode)
            .ok_or_else(|| StoreError::Decode(format!("mode: unknown value {mode:?}")))?;

        Ok(VisibilitySettings {
            mode,
            show_online_status,
            hidden_from_users: decode_id_set(&hidden, "hidden_from_users")?,
            visible_to_users: decode_id_set(&visible, "visible_to_users")?,
            allowed_locations: decode_string_set(&locations, "allowed_locations")?,
        })
    }

    fn upsert_read_receipts(
        &self,
        message_ids: &[MessageId],
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<MessageId>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let read_at = at.to_rfc3339();
        let mut newly = Vec::new();

        for &message_id in message_ids {
            let inserted = tx.execute(
                "INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (message_id, user_id) DO NOTHING",
                params![message_id, user_id, read_at],
            )?;
            if inserted == 1 {
                newly.push(message_id);
            } else {
                tx.execute(
                    "UPDATE message_reads SET read_at = ?3 WHERE message_id = ?1 AND user_id = ?2",
                    params![message_id, user_id, read_at],
                )?;
            }
        }

        tx.commit()?;
        Ok(newly)
    }

    fn get_unread_message_ids(
        &self,
        chat: ChatRef,
        user_id: UserId,
    ) -> StoreResult<Vec<MessageId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT m.id FROM messages m
             WHERE m.chat_type = ?1 AND m.chat_id = ?2 AND m.sender_id != ?3 AND m.is_deleted = 0
               AND NOT EXISTS (
                   SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = ?3
               )
             ORDER BY m.id ASC",
        )?;
        let ids = stmt
            .query_map(
                params![chat.chat_type.as_str(), chat.chat_id, user_id],
                |row| row.get::<_, MessageId>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn set_user_online(
        &self,
        user_id: UserId,
        location: Option<&str>,
        session_id: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users
             SET is_online = 1, location = COALESCE(?2, location), session_id = ?3, last_seen = ?4
             WHERE id = ?1",
            params![user_id, location, session_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn set_user_offline(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET is_online = 0, session_id = NULL, last_seen = ?2 WHERE id = ?1",
            params![user_id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn get_username(&self, user_id: UserId) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        let username = conn
            .query_row(
                "SELECT username FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(username)
    }

    fn get_last_seen(&self, user_id: UserId) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT last_seen FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();

        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| StoreError::Decode(format!("last_seen: {e}")))
        })
        .transpose()
    }

    fn get_message_senders(
        &self,
        chat: ChatRef,
        message_ids: &[MessageId],
    ) -> StoreResult<Vec<(MessageId, UserId)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT sender_id FROM messages
             WHERE id = ?1 AND chat_type = ?2 AND chat_id = ?3 AND is_deleted = 0",
        )?;

        let mut senders = Vec::with_capacity(message_ids.len());
        for &message_id in message_ids {
            let sender = stmt
                .query_row(
                    params![message_id, chat.chat_type.as_str(), chat.chat_id],
                    |row| row.get::<_, UserId>(0),
                )
                .optional()?;
            if let Some(sender_id) = sender {
                senders.push((message_id, sender_id));
            }
        }
        Ok(senders)
    }

    fn get_user_group_ids(&self, user_id: UserId) -> StoreResult<Vec<ChatId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT group_id FROM group_members WHERE user_id = ?1 AND is_active = 1
             ORDER BY group_id",
        )?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get::<_, ChatId>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

fn member_ids_with_role(conn: &Connection, channel_id: ChatId) -> StoreResult<HashSet<UserId>> {
    member_ids(
        conn,
        "SELECT user_id FROM channel_members
         WHERE channel_id = ?1 AND is_active = 1 AND role IN ('creator', 'admin')",
        channel_id,
    )
}
