//! WebSocket front door: accept loop and per-connection reader/writer tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::error::Result;
use crate::identity::{Identity, IdentityProvider};
use crate::service::ChatService;
use crate::session::Session;

#[derive(Clone)]
pub struct ChatServer {
    service: Arc<ChatService>,
    identity: Arc<dyn IdentityProvider>,
}

impl ChatServer {
    pub fn new(service: Arc<ChatService>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { service, identity }
    }

    pub fn service(&self) -> &Arc<ChatService> {
        &self.service
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        log::info!("Chat server listening on {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, addr).await;
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let mut identity: Option<Identity> = None;
        let provider = Arc::clone(&self.identity);
        let callback = |request: &Request, response: Response| {
            identity = provider.resolve(request);
            Ok::<Response, ErrorResponse>(response)
        };

        let ws_stream = match accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(err) => {
                log::warn!("WebSocket handshake with {addr} failed: {err}");
                return;
            }
        };

        let (mut sink, mut frames) = ws_stream.split();
        let (mut session, mut events) = Session::open(Arc::clone(&self.service), identity).await;
        let connection = session.id();
        log::info!("Connection {connection} opened from {addr}");

        let writer = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        log::error!("Failed to encode {} event: {err}", event.name());
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text)).await {
                    log::debug!("Connection {connection} write failed: {err}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Message::Text(text)) => session.handle_frame(&text).await,
                Ok(Message::Close(_)) => break,
                Ok(Message::Binary(_)) => {
                    log::warn!("Connection {connection} sent a binary frame; ignoring");
                }
                Ok(_) => {}
                Err(err) => {
                    log::debug!("Connection {connection} read failed: {err}");
                    break;
                }
            }
        }

        session.close();
        if let Err(err) = writer.await {
            log::warn!("Writer task for {connection} ended abnormally: {err}");
        }
    }
}
