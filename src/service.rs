//! Chat operations shared by every connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::common::{
    ChatRoom, ConnectionId, HistoryEntry, JoinRequest, NewMessage, Role, RoomId, RoomSummary,
    ServerEvent, UserProfile,
};
use crate::error::{ChatError, Result};
use crate::identity::Identity;
use crate::presence::{EventReceiver, PresenceRouter};
use crate::storage::ChatStore;

/// Room directory, message log and presence router wired together.
///
/// Writes to one room are serialized: append, fan-out and the joiner's
/// history snapshot all happen under that room's lock, so every observer
/// sees messages in log order.
pub struct ChatService {
    store: ChatStore,
    router: Arc<PresenceRouter>,
    room_locks: Mutex<HashMap<RoomId, Arc<AsyncMutex<()>>>>,
}

impl ChatService {
    pub fn new(store: ChatStore, router: Arc<PresenceRouter>) -> Self {
        Self {
            store,
            router,
            room_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn router(&self) -> &Arc<PresenceRouter> {
        &self.router
    }

    fn room_lock(&self, room_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.room_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(room_id.to_string()).or_default())
    }

    /// Register a live connection; identified ones join their user group.
    pub async fn connect(
        &self,
        connection: ConnectionId,
        identity: Option<&Identity>,
    ) -> EventReceiver {
        let events = self.router.register(connection);
        let Some(identity) = identity else {
            log::info!("Connection {connection} is anonymous");
            return events;
        };

        self.router.join_user_group(connection, &identity.user_id);
        log::info!("Connection {connection} bound to user {}", identity.user_id);

        if let Some(name) = &identity.name {
            let profile = UserProfile {
                id: identity.user_id.clone(),
                name: name.clone(),
            };
            if let Err(err) = self.store.upsert_user(profile, identity.role).await {
                log::error!("Failed to record profile for {}: {err}", identity.user_id);
            }
        }
        events
    }

    pub fn disconnect(&self, connection: ConnectionId) {
        self.router.disconnect(connection);
        log::info!("Connection {connection} disconnected");
    }

    /// Resolve the room, join its group and send history followed by `roomJoined`.
    ///
    /// A bound connection opens a room as whichever side of the pair it
    /// actually is; the `role` in the request only counts for anonymous ones.
    pub async fn join_room(
        &self,
        connection: ConnectionId,
        actor: Option<&Identity>,
        request: JoinRequest,
    ) -> Result<ChatRoom> {
        let room = match request {
            JoinRequest::ByRoomId(room_id) => self.store.lookup(&room_id).await?,
            JoinRequest::ByParticipants {
                buyer_id,
                seller_id,
                role,
            } => {
                let role = match actor {
                    Some(identity) => Some(side_in_pair(identity, &buyer_id, &seller_id)?),
                    None => role,
                };
                let (room, created) = self
                    .store
                    .resolve_or_create(&buyer_id, &seller_id, role)
                    .await?;
                if created {
                    log::info!("Created chat room {} ({buyer_id} -> {seller_id})", room.id);
                }
                room
            }
        };

        if let Some(identity) = actor {
            if !room.is_participant(&identity.user_id) {
                return Err(not_a_participant());
            }
        }

        let lock = self.room_lock(&room.id);
        let _guard = lock.lock().await;

        self.router.join_room_group(connection, &room.id);
        let messages = self.store.history(&room.id).await?;
        let profiles = self
            .store
            .user_profiles(room.participants().ids().map(str::to_string).to_vec())
            .await?;
        let history = messages
            .into_iter()
            .map(|message| HistoryEntry {
                user: profiles
                    .iter()
                    .find(|profile| profile.id == message.sender_id)
                    .cloned(),
                message,
            })
            .collect();

        self.router
            .send_to(connection, ServerEvent::ChatHistory(history));
        self.router.send_to(
            connection,
            ServerEvent::RoomJoined {
                room_id: room.id.clone(),
            },
        );
        log::debug!("Connection {connection} joined room {}", room.id);

        Ok(room)
    }

    /// Append a message, fan it out to the room and notify both participants.
    ///
    /// Room and profiles are read before the append, so once the message is
    /// stored nothing can keep `newMessage` from going out.
    pub async fn send_message(
        &self,
        actor: Option<&str>,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<NewMessage> {
        ensure_acting_as(actor, sender_id)?;

        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        // Everything that can fail before the message is stored.
        let room = self.store.lookup(room_id).await?;
        let profiles = self
            .store
            .user_profiles(room.participants().ids().map(str::to_string).to_vec())
            .await?;
        let profile_of = |id: &str| profiles.iter().find(|p| p.id == id).cloned();

        let message = self.store.append(room_id, sender_id, content).await?;
        let notice = NewMessage {
            id: message.id.clone(),
            content: message.content.clone(),
            sender_id: message.sender_id.clone(),
            username: profile_of(sender_id)
                .map(|p| p.name)
                .unwrap_or_else(|| sender_id.to_string()),
            timestamp: message.timestamp,
        };
        let reached = self
            .router
            .broadcast_to_room(room_id, &ServerEvent::NewMessage(notice.clone()));
        log::debug!("Message {} in room {room_id} reached {reached} connection(s)", message.id);

        // Stored and announced from here on; notification failures are logged, not returned.
        for participant in room.participants().ids() {
            let unread = match self.store.unread_count_for(room_id, participant).await {
                Ok(unread) => unread,
                Err(err) => {
                    log::error!(
                        "Message {} stored but chatUpdated for {participant} skipped: {err}",
                        message.id
                    );
                    continue;
                }
            };
            let summary = RoomSummary {
                id: room.id.clone(),
                latest_message: message.content.clone(),
                unread,
                other_party: room.other_party(participant).and_then(profile_of),
            };
            self.router
                .broadcast_to_user(participant, &ServerEvent::ChatUpdated(summary));
        }

        Ok(notice)
    }

    /// Mark the other participant's messages as read and tell the room.
    pub async fn mark_as_read(
        &self,
        actor: Option<&str>,
        room_id: &str,
        reader_id: &str,
    ) -> Result<usize> {
        ensure_acting_as(actor, reader_id)?;

        let room = self.store.lookup(room_id).await?;
        if !room.is_participant(reader_id) {
            return Err(not_a_participant());
        }

        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        let changed = self.store.mark_read(room_id, reader_id).await?;
        self.router.broadcast_to_room(
            room_id,
            &ServerEvent::MessagesRead {
                room_id: room_id.to_string(),
                reader_id: reader_id.to_string(),
            },
        );
        log::debug!("{reader_id} read {changed} message(s) in room {room_id}");

        Ok(changed)
    }

    /// Send the caller's conversation list on `side` back to the caller.
    pub async fn list_chats(
        &self,
        connection: ConnectionId,
        actor: Option<&str>,
        side: Role,
    ) -> Result<usize> {
        let Some(viewer) = actor else {
            return Err(ChatError::Unauthorized(
                "Sign in to list conversations".to_string(),
            ));
        };
        let chats = self.store.list_chats(viewer, side).await?;
        let count = chats.len();
        self.router.send_to(connection, ServerEvent::ChatList(chats));
        Ok(count)
    }
}

/// The side `identity` holds in the `(buyer_id, seller_id)` pair.
///
/// A connection that signed in as a seller is never treated as the buyer,
/// even when its id sits in the buyer slot.
fn side_in_pair(identity: &Identity, buyer_id: &str, seller_id: &str) -> Result<Role> {
    let id = identity.user_id.as_str();
    if id == buyer_id && identity.role != Some(Role::Seller) {
        Ok(Role::Buyer)
    } else if id == buyer_id || id == seller_id {
        Ok(Role::Seller)
    } else {
        Err(not_a_participant())
    }
}

fn not_a_participant() -> ChatError {
    ChatError::Unauthorized("You are not a participant of this chat".to_string())
}

/// A bound connection may only speak for its own identity.
fn ensure_acting_as(actor: Option<&str>, claimed: &str) -> Result<()> {
    if claimed.trim().is_empty() {
        return Err(ChatError::InvalidInput("Missing user id".to_string()));
    }
    match actor {
        Some(actor) if actor != claimed => Err(ChatError::Unauthorized(
            "Cannot act on behalf of another user".to_string(),
        )),
        _ => Ok(()),
    }
}
