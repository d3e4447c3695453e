//! Resolving who is on the other end of a socket.
//!
//! Token verification happens upstream; by the time the upgrade request
//! reaches us its identity fields are trusted as-is.

use serde::Deserialize;
use tokio_tungstenite::tungstenite::handshake::server::Request;

use crate::common::{Role, UserId};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";
pub const NAME_HEADER: &str = "x-user-name";

/// Verified identity bound to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Option<Role>,
    /// Display name, when the upstream gateway forwards one.
    pub name: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: None,
            name: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Maps a WebSocket upgrade request to an identity. `None` means anonymous.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, request: &Request) -> Option<Identity>;
}

/// Reads `x-user-*` headers, falling back to `userId`/`role`/`name` query parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandshakeIdentity;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeQuery {
    user_id: Option<String>,
    role: Option<String>,
    name: Option<String>,
}

impl IdentityProvider for HandshakeIdentity {
    fn resolve(&self, request: &Request) -> Option<Identity> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let query = request
            .uri()
            .query()
            .and_then(|raw| match serde_urlencoded::from_str::<HandshakeQuery>(raw) {
                Ok(query) => Some(query),
                Err(err) => {
                    log::debug!("Ignoring malformed handshake query `{raw}`: {err}");
                    None
                }
            })
            .unwrap_or_default();

        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let user_id = header(USER_ID_HEADER).or_else(|| non_empty(query.user_id))?;
        let role = header(ROLE_HEADER)
            .or(query.role)
            .and_then(|role| Role::parse(&role));
        let name = header(NAME_HEADER).or_else(|| non_empty(query.name));

        Some(Identity {
            user_id,
            role,
            name,
        })
    }
}
