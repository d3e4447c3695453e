//! Per-connection protocol state.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::common::{ClientCommand, ConnectionId, JoinRequest, RoomId, ServerEvent};
use crate::error::{ChatError, Result};
use crate::identity::Identity;
use crate::presence::EventReceiver;
use crate::service::ChatService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected without an identity.
    Unbound,
    /// Member of its user group for the rest of the connection. The role is
    /// kept so room creation follows the signed-in side, not the payload.
    Bound { identity: Identity },
}

/// One live connection: identity, joined rooms and command dispatch.
pub struct Session {
    id: ConnectionId,
    state: SessionState,
    joined_rooms: BTreeSet<RoomId>,
    service: Arc<ChatService>,
}

impl Session {
    /// Register the connection and bind it to its user group when identified.
    pub async fn open(
        service: Arc<ChatService>,
        identity: Option<Identity>,
    ) -> (Self, EventReceiver) {
        let id = ConnectionId::new();
        let events = service.connect(id, identity.as_ref()).await;
        let state = match identity {
            Some(identity) => SessionState::Bound { identity },
            None => SessionState::Unbound,
        };

        let session = Self {
            id,
            state,
            joined_rooms: BTreeSet::new(),
            service,
        };
        (session, events)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn joined_rooms(&self) -> &BTreeSet<RoomId> {
        &self.joined_rooms
    }

    fn actor(&self) -> Option<Identity> {
        match &self.state {
            SessionState::Bound { identity } => Some(identity.clone()),
            SessionState::Unbound => None,
        }
    }

    /// Decode one text frame and run it. Failures go back to this connection only.
    pub async fn handle_frame(&mut self, text: &str) {
        match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => self.handle(command).await,
            Err(err) => self.report(ChatError::from(err)),
        }
    }

    pub async fn handle(&mut self, command: ClientCommand) {
        log::debug!("Connection {} -> {:?}", self.id, command);

        // Run on its own task so a client hanging up mid-operation cannot cancel it.
        let task = tokio::spawn(dispatch(
            Arc::clone(&self.service),
            self.id,
            self.actor(),
            command,
        ));

        match task.await {
            Ok(Ok(Some(room_id))) => {
                self.joined_rooms.insert(room_id);
            }
            Ok(Ok(None)) => {}
            Ok(Err(err)) => self.report(err),
            Err(err) => self.report(ChatError::Task(err.to_string())),
        }
    }

    fn report(&self, err: ChatError) {
        if err.is_internal() {
            log::error!("Connection {}: {err}", self.id);
        } else {
            log::warn!("Connection {} rejected: {err}", self.id);
        }
        self.service
            .router()
            .send_to(self.id, ServerEvent::error(err.client_reason()));
    }

    /// Leave every group. Consumes the session.
    pub fn close(self) {
        self.service.disconnect(self.id);
    }
}

/// Execute a command. Returns the room id when the connection joined one.
async fn dispatch(
    service: Arc<ChatService>,
    connection: ConnectionId,
    identity: Option<Identity>,
    command: ClientCommand,
) -> Result<Option<RoomId>> {
    let actor = identity.as_ref().map(|identity| identity.user_id.as_str());
    match command {
        ClientCommand::JoinRoom(params) => {
            let request = JoinRequest::try_from(params)?;
            let room = service
                .join_room(connection, identity.as_ref(), request)
                .await?;
            Ok(Some(room.id))
        }
        ClientCommand::SendMessage {
            room_id,
            sender_id,
            content,
        } => {
            service
                .send_message(actor, &room_id, &sender_id, &content)
                .await?;
            Ok(None)
        }
        ClientCommand::MarkAsRead { room_id, user_id } => {
            service.mark_as_read(actor, &room_id, &user_id).await?;
            Ok(None)
        }
        ClientCommand::ListChats { side } => {
            service.list_chats(connection, actor, side).await?;
            Ok(None)
        }
    }
}
