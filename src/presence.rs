//! Presence and broadcast routing for live connections.
//!
//! Two kinds of groups are tracked: room groups (connections currently
//! viewing a room) and user groups (every connection of one identity).
//! Membership lives only as long as the connection does.
//!
//! Delivery pushes into each connection's unbounded outbound queue and never
//! waits on the socket, so a stalled client cannot hold up a sender.
//!
//! Groups are per-process. Running several server processes behind a load
//! balancer would need a shared bus so a broadcast reaches connections held
//! by the other processes; that is not handled here.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::common::{ConnectionId, RoomId, ServerEvent, UserId};

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

#[derive(Default)]
struct ConnectionEntry {
    user_id: Option<UserId>,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct RouterState {
    senders: HashMap<ConnectionId, EventSender>,
    entries: HashMap<ConnectionId, ConnectionEntry>,
    room_groups: HashMap<RoomId, HashSet<ConnectionId>>,
    user_groups: HashMap<UserId, HashSet<ConnectionId>>,
}

/// Connection-to-group membership tables for one process.
#[derive(Default)]
pub struct PresenceRouter {
    state: Mutex<RouterState>,
}

impl PresenceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RouterState) -> T) -> T {
        // Membership tables stay consistent across a panic in another holder.
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut *state)
    }

    /// Register a new connection and return the receiving end of its queue.
    pub fn register(&self, connection: ConnectionId) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.with_state(|state| {
            state.senders.insert(connection, tx);
            state.entries.entry(connection).or_default();
        });
        rx
    }

    pub fn join_user_group(&self, connection: ConnectionId, user_id: &str) {
        self.with_state(|state| {
            let Some(entry) = state.entries.get_mut(&connection) else {
                log::warn!("join_user_group for unknown connection {connection}");
                return;
            };
            if let Some(previous) = entry.user_id.replace(user_id.to_string()) {
                if previous != user_id {
                    remove_member(&mut state.user_groups, &previous, connection);
                }
            }
            state
                .user_groups
                .entry(user_id.to_string())
                .or_default()
                .insert(connection);
        });
    }

    pub fn join_room_group(&self, connection: ConnectionId, room_id: &str) {
        self.with_state(|state| {
            let Some(entry) = state.entries.get_mut(&connection) else {
                log::warn!("join_room_group for unknown connection {connection}");
                return;
            };
            entry.rooms.insert(room_id.to_string());
            state
                .room_groups
                .entry(room_id.to_string())
                .or_default()
                .insert(connection);
        });
    }

    /// Push `event` to every member of the room group. Returns the number of queues reached.
    pub fn broadcast_to_room(&self, room_id: &str, event: &ServerEvent) -> usize {
        self.with_state(|state| {
            let members = state.room_groups.get(room_id);
            deliver(&state.senders, members, event)
        })
    }

    /// Push `event` to every live connection of `user_id`.
    pub fn broadcast_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        self.with_state(|state| {
            let members = state.user_groups.get(user_id);
            deliver(&state.senders, members, event)
        })
    }

    /// Push `event` to one connection only.
    pub fn send_to(&self, connection: ConnectionId, event: ServerEvent) -> bool {
        self.with_state(|state| match state.senders.get(&connection) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        })
    }

    /// Drop the connection from every group it joined.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.with_state(|state| {
            state.senders.remove(&connection);
            let Some(entry) = state.entries.remove(&connection) else {
                return;
            };
            for room_id in &entry.rooms {
                remove_member(&mut state.room_groups, room_id, connection);
            }
            if let Some(user_id) = &entry.user_id {
                remove_member(&mut state.user_groups, user_id, connection);
            }
        });
    }

    pub fn room_members(&self, room_id: &str) -> usize {
        self.with_state(|state| state.room_groups.get(room_id).map_or(0, HashSet::len))
    }

    pub fn user_connections(&self, user_id: &str) -> usize {
        self.with_state(|state| state.user_groups.get(user_id).map_or(0, HashSet::len))
    }

    pub fn connection_count(&self) -> usize {
        self.with_state(|state| state.senders.len())
    }
}

fn deliver(
    senders: &HashMap<ConnectionId, EventSender>,
    members: Option<&HashSet<ConnectionId>>,
    event: &ServerEvent,
) -> usize {
    let Some(members) = members else {
        return 0;
    };
    members
        .iter()
        .filter_map(|id| senders.get(id))
        .filter(|tx| tx.send(event.clone()).is_ok())
        .count()
}

fn remove_member(
    groups: &mut HashMap<String, HashSet<ConnectionId>>,
    key: &str,
    connection: ConnectionId,
) {
    if let Some(members) = groups.get_mut(key) {
        members.remove(&connection);
        if members.is_empty() {
            groups.remove(key);
        }
    }
}
