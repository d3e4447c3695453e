pub mod commands;
pub mod events;
pub mod types;

pub use commands::{ClientCommand, JoinRequest, JoinRoomParams};
pub use events::{HistoryEntry, NewMessage, ServerEvent};
pub use types::{
    ChatListEntry, ChatRoom, ConnectionId, Message, MessageId, Role, RoomId, RoomSummary,
    UnreadCount, UserId, UserProfile,
};
