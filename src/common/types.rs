use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

pub type RoomId = String;
pub type UserId = String;
pub type MessageId = String;

/// Handle of one live socket. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a conversation an identity acts on.
///
/// The storefront calls buyers "user", so both spellings are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "user")]
    Buyer,
    Seller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buyer" | "user" => Some(Role::Buyer),
            "seller" => Some(Role::Seller),
            _ => None,
        }
    }
}

/// Conversation between exactly one buyer and one seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: RoomId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub created_at: i64,
}

impl ChatRoom {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// The participant that is not `user_id`, if `user_id` belongs to the room.
    pub fn other_party(&self, user_id: &str) -> Option<&str> {
        if self.buyer_id == user_id {
            Some(&self.seller_id)
        } else if self.seller_id == user_id {
            Some(&self.buyer_id)
        } else {
            None
        }
    }

    pub fn participants(&self) -> Participants<'_> {
        Participants {
            buyer_id: &self.buyer_id,
            seller_id: &self.seller_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participants<'a> {
    pub buyer_id: &'a str,
    pub seller_id: &'a str,
}

impl<'a> Participants<'a> {
    /// Both ids, buyer first.
    pub fn ids(&self) -> [&'a str; 2] {
        [self.buyer_id, self.seller_id]
    }
}

/// One entry of a room's message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "chatRoomId")]
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    /// Unix epoch milliseconds, non-decreasing within a room.
    pub timestamp: i64,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
}

/// Exact number of unread messages. Only the serialized form is capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct UnreadCount(u64);

impl UnreadCount {
    pub const DISPLAY_CAP: u64 = 10;

    pub fn new(count: u64) -> Self {
        Self(count)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_capped(&self) -> bool {
        self.0 > Self::DISPLAY_CAP
    }
}

impl fmt::Display for UnreadCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_capped() {
            write!(f, "{}+", Self::DISPLAY_CAP)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Serialize for UnreadCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_capped() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_u64(self.0)
        }
    }
}

/// Per-user notification that a room changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub latest_message: String,
    pub unread: UnreadCount,
    pub other_party: Option<UserProfile>,
}

/// Row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListEntry {
    pub id: RoomId,
    pub other_party: Option<UserProfile>,
    pub latest_message: String,
    pub unread: UnreadCount,
    pub timestamp: i64,
}
