//! WebSocket relay server.
//!
//! Accepts client connections, feeds their frames through the `Registry`,
//! and queues the resulting deliveries on each connection. A single task
//! owns the registry and every connection, so frames are applied in the
//! order the server receives them. WebSocket handshakes run on their own
//! tasks and hand finished streams back to that loop.

use crate::connection::{ClientConnection, ConnectionEvent};
use crate::message::RelayFrame;
use crate::registry::{Delivery, Registry};
use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, error, info, warn};

/// Upgrades that take longer than this are dropped.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A socket that finished its WebSocket handshake.
struct Accepted {
    addr: SocketAddr,
    ws_stream: WebSocketStream<TcpStream>,
}

pub struct RelayServer {
    registry: Registry,
    connections: HashMap<String, ClientConnection>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    accepted_tx: mpsc::UnboundedSender<Accepted>,
    accepted_rx: mpsc::UnboundedReceiver<Accepted>,
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayServer {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            registry: Registry::new(),
            connections: HashMap::new(),
            event_tx,
            event_rx,
            accepted_tx,
            accepted_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections and relay frames. Runs until dropped.
    pub async fn run(mut self, listener: TcpListener) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_handshake(stream, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                Some(accepted) = self.accepted_rx.recv() => {
                    self.register(accepted);
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }
            }
        }
    }

    /// Upgrade a TCP connection to WebSocket off the event loop.
    fn spawn_handshake(&self, stream: TcpStream, addr: SocketAddr) {
        let accepted_tx = self.accepted_tx.clone();
        tokio::spawn(async move {
            let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, accept_async(stream)).await;
            let ws_stream = match handshake {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    // Health checks connect and close without a WebSocket handshake.
                    let err_str = e.to_string();
                    if err_str.contains("Handshake not finished")
                        || err_str.contains("Connection reset")
                        || err_str.contains("unexpected EOF")
                    {
                        debug!("Connection closed before handshake from {}", addr);
                    } else {
                        error!("WebSocket upgrade failed for {}: {}", addr, e);
                    }
                    return;
                }
                Err(_) => {
                    warn!("WebSocket handshake from {} timed out", addr);
                    return;
                }
            };
            let _ = accepted_tx.send(Accepted { addr, ws_stream });
        });
    }

    fn register(&mut self, accepted: Accepted) {
        let client_id = uuid::Uuid::new_v4().to_string();
        info!(
            "New connection from {} (client_id: {})",
            accepted.addr, client_id
        );

        let conn = ClientConnection::new(
            client_id.clone(),
            accepted.ws_stream,
            self.event_tx.clone(),
        );
        self.connections.insert(client_id, conn);
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Frame { client_id, frame } => {
                debug!("Frame on {} from {}: {:?}", frame.channel(), client_id, frame);
                let deliveries = self.registry.handle(&client_id, frame);
                self.deliver(deliveries);
            }
            ConnectionEvent::Invalid { client_id, reason } => {
                warn!("Invalid frame from {}: {}", client_id, reason);
                self.deliver(vec![(client_id, RelayFrame::error(reason))]);
            }
            ConnectionEvent::Closed { client_id } => self.drop_client(&client_id),
        }
    }

    fn drop_client(&mut self, client_id: &str) {
        let Some(mut conn) = self.connections.remove(client_id) else {
            return;
        };
        conn.close();
        let deliveries = self.registry.disconnect(client_id);
        info!(
            "Client {} disconnected ({} connection(s) remain)",
            client_id,
            self.connections.len()
        );
        self.deliver(deliveries);
    }

    /// Queue deliveries. Clients that cannot keep up are disconnected.
    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        let mut stalled = Vec::new();
        for (client_id, frame) in deliveries {
            let Some(conn) = self.connections.get(&client_id) else {
                continue;
            };
            if let Err(e) = conn.send(&frame) {
                warn!("Failed to deliver to {}: {}", client_id, e);
                if !stalled.contains(&client_id) {
                    stalled.push(client_id);
                }
            }
        }
        for client_id in stalled {
            self.drop_client(&client_id);
        }
    }
}
