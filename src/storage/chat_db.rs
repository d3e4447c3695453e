use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqlResult, Row, params};
use std::path::Path;
use uuid::Uuid;

use super::database::Database;
use crate::common::{ChatListEntry, ChatRoom, Message, Role, UnreadCount, UserProfile};
use crate::error::{ChatError, Result};

/// Longest accepted message body, in bytes.
pub const MAX_CONTENT_LENGTH: usize = 4096;

/// Durable chat state: users, room directory and message log.
pub struct ChatDatabase {
    db: Database,
}

impl ChatDatabase {
    /// Open the chat database at `path`
    pub fn with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let chat_db = Self {
            db: Database::open(path)?,
        };
        chat_db.init_schema()?;
        Ok(chat_db)
    }

    pub fn in_memory() -> Result<Self> {
        let chat_db = Self {
            db: Database::in_memory()?,
        };
        chat_db.init_schema()?;
        Ok(chat_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.db.connection();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                role TEXT,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        // pair_key is the unordered (buyer, seller) pair; UNIQUE makes the first insert win
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chat_rooms (
                id TEXT PRIMARY KEY,
                buyer_id TEXT NOT NULL,
                seller_id TEXT NOT NULL,
                pair_key TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                room_id TEXT NOT NULL REFERENCES chat_rooms(id),
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                read INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_room_order ON messages(room_id, timestamp, seq)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_room_unread ON messages(room_id, read, sender_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rooms_buyer ON chat_rooms(buyer_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rooms_seller ON chat_rooms(seller_id)",
            [],
        )?;

        Ok(())
    }

    // ========== Users ==========

    pub fn upsert_user(&self, profile: &UserProfile, role: Option<Role>) -> Result<()> {
        let conn = self.db.connection();
        conn.execute(
            "INSERT INTO users (id, name, role, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                role = COALESCE(excluded.role, users.role),
                updated_at = excluded.updated_at",
            params![
                profile.id,
                profile.name,
                role.map(|r| r.as_str()),
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    pub fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let conn = self.db.connection();
        let profile = conn
            .query_row(
                "SELECT id, name FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(UserProfile {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    // ========== Rooms ==========

    /// Return the room for the pair, creating it when the caller is on the buyer side.
    ///
    /// The boolean is true when this call inserted the room.
    pub fn resolve_or_create_room(
        &self,
        buyer_id: &str,
        seller_id: &str,
        role: Option<Role>,
    ) -> Result<(ChatRoom, bool)> {
        if buyer_id == seller_id {
            return Err(ChatError::InvalidInput(
                "Cannot open a chat with yourself".to_string(),
            ));
        }

        let pair_key = pair_key(buyer_id, seller_id);
        if let Some(room) = self.find_room_by_pair_key(&pair_key)? {
            return Ok((room, false));
        }

        if role != Some(Role::Buyer) {
            return Err(ChatError::Unauthorized(
                "Chat room does not exist. Only buyers can initiate chat.".to_string(),
            ));
        }

        let conn = self.db.connection();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO chat_rooms (id, buyer_id, seller_id, pair_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                buyer_id,
                seller_id,
                pair_key,
                Utc::now().timestamp_millis()
            ],
        )?;

        // A concurrent writer may have won the insert; either way the row now exists.
        let room = self.find_room_by_pair_key(&pair_key)?.ok_or_else(|| {
            ChatError::NotFound("Chat room does not exist".to_string())
        })?;
        Ok((room, inserted == 1))
    }

    pub fn find_room(&self, buyer_id: &str, seller_id: &str) -> Result<Option<ChatRoom>> {
        self.find_room_by_pair_key(&pair_key(buyer_id, seller_id))
    }

    fn find_room_by_pair_key(&self, pair_key: &str) -> Result<Option<ChatRoom>> {
        let conn = self.db.connection();
        let room = conn
            .query_row(
                "SELECT id, buyer_id, seller_id, created_at FROM chat_rooms WHERE pair_key = ?1",
                params![pair_key],
                room_from_row,
            )
            .optional()?;
        Ok(room)
    }

    pub fn room(&self, room_id: &str) -> Result<ChatRoom> {
        let conn = self.db.connection();
        conn.query_row(
            "SELECT id, buyer_id, seller_id, created_at FROM chat_rooms WHERE id = ?1",
            params![room_id],
            room_from_row,
        )
        .optional()?
        .ok_or_else(|| ChatError::NotFound("Chat room does not exist".to_string()))
    }

    /// Rooms where `user_id` sits on `side`.
    pub fn rooms_for(&self, user_id: &str, side: Role) -> Result<Vec<ChatRoom>> {
        let conn = self.db.connection();
        let sql = match side {
            Role::Buyer => {
                "SELECT id, buyer_id, seller_id, created_at FROM chat_rooms WHERE buyer_id = ?1"
            }
            Role::Seller => {
                "SELECT id, buyer_id, seller_id, created_at FROM chat_rooms WHERE seller_id = ?1"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let rooms = stmt
            .query_map(params![user_id], room_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rooms)
    }

    // ========== Messages ==========

    /// Append a message. Timestamps never go backwards within a room.
    pub fn append_message(&mut self, room_id: &str, sender_id: &str, content: &str) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidInput(
                "Message content cannot be empty".to_string(),
            ));
        }
        if content.len() > MAX_CONTENT_LENGTH {
            return Err(ChatError::InvalidInput(format!(
                "Message content exceeds {MAX_CONTENT_LENGTH} bytes"
            )));
        }

        let room = self.room(room_id)?;
        if !room.is_participant(sender_id) {
            return Err(ChatError::Unauthorized(
                "Sender is not a participant of this chat".to_string(),
            ));
        }

        let tx = self.db.connection_mut().transaction()?;
        let last: Option<i64> = tx.query_row(
            "SELECT MAX(timestamp) FROM messages WHERE room_id = ?1",
            params![room_id],
            |row| row.get(0),
        )?;
        let now = Utc::now().timestamp_millis();
        let message = Message {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            timestamp: last.map_or(now, |last| last.max(now)),
            read: false,
        };
        tx.execute(
            "INSERT INTO messages (id, room_id, sender_id, content, timestamp, read)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                message.id,
                message.room_id,
                message.sender_id,
                message.content,
                message.timestamp
            ],
        )?;
        tx.commit()?;

        Ok(message)
    }

    /// Full log of a room, oldest first.
    pub fn history(&self, room_id: &str) -> Result<Vec<Message>> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT id, room_id, sender_id, content, timestamp, read
             FROM messages
             WHERE room_id = ?1
             ORDER BY timestamp ASC, seq ASC",
        )?;

        let messages = stmt
            .query_map(params![room_id], message_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(messages)
    }

    pub fn latest_message(&self, room_id: &str) -> Result<Option<Message>> {
        let conn = self.db.connection();
        let message = conn
            .query_row(
                "SELECT id, room_id, sender_id, content, timestamp, read
                 FROM messages
                 WHERE room_id = ?1
                 ORDER BY timestamp DESC, seq DESC
                 LIMIT 1",
                params![room_id],
                message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    /// Flag every unread message not written by `reader_id` as read.
    ///
    /// Returns how many rows changed; zero on repeat calls.
    pub fn mark_read(&self, room_id: &str, reader_id: &str) -> Result<usize> {
        let conn = self.db.connection();
        let changed = conn.execute(
            "UPDATE messages SET read = 1
             WHERE room_id = ?1 AND read = 0 AND sender_id != ?2",
            params![room_id, reader_id],
        )?;
        Ok(changed)
    }

    pub fn unread_count_for(&self, room_id: &str, viewer_id: &str) -> Result<UnreadCount> {
        let conn = self.db.connection();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE room_id = ?1 AND read = 0 AND sender_id != ?2",
            params![room_id, viewer_id],
            |row| row.get(0),
        )?;
        Ok(UnreadCount::new(count as u64))
    }

    // ========== Chat list ==========

    /// Conversations of `viewer_id` on `side` that have at least one message, newest first.
    pub fn list_chats(&self, viewer_id: &str, side: Role) -> Result<Vec<ChatListEntry>> {
        let mut entries = Vec::new();
        for room in self.rooms_for(viewer_id, side)? {
            let Some(latest) = self.latest_message(&room.id)? else {
                continue;
            };
            let other_party = match room.other_party(viewer_id) {
                Some(other_id) => self.user_profile(other_id)?,
                None => None,
            };
            entries.push(ChatListEntry {
                unread: self.unread_count_for(&room.id, viewer_id)?,
                id: room.id,
                other_party,
                latest_message: latest.content,
                timestamp: latest.timestamp,
            });
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }
}

fn pair_key(a: &str, b: &str) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}\u{1f}{high}")
}

fn room_from_row(row: &Row<'_>) -> SqlResult<ChatRoom> {
    Ok(ChatRoom {
        id: row.get(0)?,
        buyer_id: row.get(1)?,
        seller_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> SqlResult<Message> {
    Ok(Message {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        timestamp: row.get(4)?,
        read: row.get(5)?,
    })
}
