use serde::{Deserialize, Serialize};

use super::types::{Role, RoomId, UserId};
use crate::error::{ChatError, Result};

/// Frames a client sends over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    JoinRoom(JoinRoomParams),
    #[serde(rename_all = "camelCase")]
    SendMessage {
        #[serde(rename = "chatRoomId")]
        room_id: RoomId,
        sender_id: UserId,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    MarkAsRead {
        #[serde(rename = "chatRoomId")]
        room_id: RoomId,
        user_id: UserId,
    },
    ListChats {
        #[serde(rename = "as")]
        side: Role,
    },
}

/// Loose `joinRoom` payload as it arrives on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomParams {
    #[serde(default, rename = "chatRoomId")]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub seller_id: Option<UserId>,
    #[serde(default)]
    pub role: Option<Role>,
}

/// A validated join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinRequest {
    ByRoomId(RoomId),
    ByParticipants {
        buyer_id: UserId,
        seller_id: UserId,
        /// Only `Some(Role::Buyer)` may create a missing room.
        role: Option<Role>,
    },
}

impl TryFrom<JoinRoomParams> for JoinRequest {
    type Error = ChatError;

    fn try_from(params: JoinRoomParams) -> Result<Self> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        if let Some(room_id) = non_empty(params.room_id) {
            return Ok(JoinRequest::ByRoomId(room_id));
        }

        match (non_empty(params.user_id), non_empty(params.seller_id)) {
            (Some(buyer_id), Some(seller_id)) => Ok(JoinRequest::ByParticipants {
                buyer_id,
                seller_id,
                role: params.role,
            }),
            _ => Err(ChatError::InvalidInput(
                "Invalid room join parameters".to_string(),
            )),
        }
    }
}
