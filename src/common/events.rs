use serde::Serialize;

use super::types::{ChatListEntry, Message, MessageId, RoomId, RoomSummary, UserId, UserProfile};

/// Frames the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    ChatHistory(Vec<HistoryEntry>),
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_id: RoomId },
    NewMessage(NewMessage),
    ChatUpdated(RoomSummary),
    #[serde(rename_all = "camelCase")]
    MessagesRead {
        #[serde(rename = "chatRoomId")]
        room_id: RoomId,
        reader_id: UserId,
    },
    ChatList(Vec<ChatListEntry>),
    Error { reason: String },
}

impl ServerEvent {
    pub fn error(reason: impl Into<String>) -> Self {
        ServerEvent::Error {
            reason: reason.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ChatHistory(_) => "chatHistory",
            ServerEvent::RoomJoined { .. } => "roomJoined",
            ServerEvent::NewMessage(_) => "newMessage",
            ServerEvent::ChatUpdated(_) => "chatUpdated",
            ServerEvent::MessagesRead { .. } => "messagesRead",
            ServerEvent::ChatList(_) => "chatList",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// History item with the author's profile attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub message: Message,
    pub user: Option<UserProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    pub username: String,
    pub timestamp: i64,
}
