pub mod chat_db;
pub mod database;

pub use chat_db::{ChatDatabase, MAX_CONTENT_LENGTH};

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::common::{ChatListEntry, ChatRoom, Message, Role, UnreadCount, UserProfile};
use crate::error::{ChatError, Result};

/// Async handle to the chat database.
///
/// Every call runs on tokio's blocking pool with exclusive access to the
/// connection, so a slow query never stalls the socket tasks.
#[derive(Clone)]
pub struct ChatStore {
    db: Arc<Mutex<ChatDatabase>>,
}

impl ChatStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_database(ChatDatabase::with_path(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_database(ChatDatabase::in_memory()?))
    }

    pub fn from_database(db: ChatDatabase) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut ChatDatabase) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|_| ChatError::Task("chat database lock poisoned".to_string()))?;
            op(&mut *guard)
        })
        .await
        .map_err(|err| ChatError::Task(err.to_string()))?
    }

    // ========== Room directory ==========

    pub async fn resolve_or_create(
        &self,
        buyer_id: &str,
        seller_id: &str,
        role: Option<Role>,
    ) -> Result<(ChatRoom, bool)> {
        let (buyer_id, seller_id) = (buyer_id.to_string(), seller_id.to_string());
        self.run(move |db| db.resolve_or_create_room(&buyer_id, &seller_id, role))
            .await
    }

    pub async fn lookup(&self, room_id: &str) -> Result<ChatRoom> {
        let room_id = room_id.to_string();
        self.run(move |db| db.room(&room_id)).await
    }

    /// `(buyer_id, seller_id)` of a room.
    pub async fn participants_of(&self, room_id: &str) -> Result<(String, String)> {
        let room = self.lookup(room_id).await?;
        Ok((room.buyer_id, room.seller_id))
    }

    // ========== Message log ==========

    pub async fn append(&self, room_id: &str, sender_id: &str, content: &str) -> Result<Message> {
        let (room_id, sender_id, content) =
            (room_id.to_string(), sender_id.to_string(), content.to_string());
        self.run(move |db| db.append_message(&room_id, &sender_id, &content))
            .await
    }

    pub async fn history(&self, room_id: &str) -> Result<Vec<Message>> {
        let room_id = room_id.to_string();
        self.run(move |db| db.history(&room_id)).await
    }

    pub async fn mark_read(&self, room_id: &str, reader_id: &str) -> Result<usize> {
        let (room_id, reader_id) = (room_id.to_string(), reader_id.to_string());
        self.run(move |db| db.mark_read(&room_id, &reader_id)).await
    }

    pub async fn unread_count_for(&self, room_id: &str, viewer_id: &str) -> Result<UnreadCount> {
        let (room_id, viewer_id) = (room_id.to_string(), viewer_id.to_string());
        self.run(move |db| db.unread_count_for(&room_id, &viewer_id))
            .await
    }

    // ========== Profiles & lists ==========

    pub async fn upsert_user(&self, profile: UserProfile, role: Option<Role>) -> Result<()> {
        self.run(move |db| db.upsert_user(&profile, role)).await
    }

    /// Profiles for several ids in one round-trip; unknown ids are skipped.
    pub async fn user_profiles(&self, user_ids: Vec<String>) -> Result<Vec<UserProfile>> {
        self.run(move |db| {
            let mut profiles = Vec::with_capacity(user_ids.len());
            for id in &user_ids {
                if let Some(profile) = db.user_profile(id)? {
                    profiles.push(profile);
                }
            }
            Ok(profiles)
        })
        .await
    }

    pub async fn list_chats(&self, viewer_id: &str, side: Role) -> Result<Vec<ChatListEntry>> {
        let viewer_id = viewer_id.to_string();
        self.run(move |db| db.list_chats(&viewer_id, side)).await
    }
}
