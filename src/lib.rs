//! Real-time buyer/seller chat for the marketplace.
//!
//! Rooms and messages live in SQLite; live delivery goes through an
//! in-process [`presence::PresenceRouter`] over WebSocket connections.

pub mod common;
pub mod config;
pub mod error;
pub mod identity;
pub mod presence;
pub mod server;
pub mod service;
pub mod session;
pub mod storage;

pub use error::{ChatError, Result};
pub use server::ChatServer;
pub use service::ChatService;
