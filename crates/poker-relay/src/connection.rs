//! A single client connection to the relay.
//!
//! Each connection wraps a WebSocket stream split into halves. The read half
//! runs in its own task and forwards parsed frames to the server. The write
//! half is owned by a writer task that drains a bounded outbound queue, so
//! the server never awaits a client's socket.

use crate::message::{ClientFrame, MAX_FRAME_SIZE, RelayFrame, from_text, to_text};
use anyhow::{Result, anyhow};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

/// Frames buffered per client before it counts as too slow.
pub const OUTBOUND_QUEUE: usize = 1024;

/// Event emitted by a connection's read task.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A well-formed frame from the client
    Frame { client_id: String, frame: ClientFrame },
    /// Something that was not a client frame
    Invalid { client_id: String, reason: String },
    /// Connection was closed
    Closed { client_id: String },
}

type WsWrite = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Server side of one client WebSocket.
pub struct ClientConnection {
    pub client_id: String,
    outbound: mpsc::Sender<Message>,
    read_task: Option<JoinHandle<()>>,
    write_task: JoinHandle<()>,
}

impl ClientConnection {
    /// Wrap an accepted WebSocket and start its reader and writer tasks.
    pub fn new(
        client_id: String,
        ws_stream: WebSocketStream<TcpStream>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (write, read) = ws_stream.split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

        let read_client_id = client_id.clone();
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_client_id, read, event_tx).await;
        });
        let write_task = tokio::spawn(Self::write_loop(client_id.clone(), write, outbound_rx));

        Self {
            client_id,
            outbound,
            read_task: Some(read_task),
            write_task,
        }
    }

    /// Drain the outbound queue into the socket. Ends once every sender is
    /// dropped or the socket fails.
    async fn write_loop(
        client_id: String,
        mut write: WsWrite,
        mut outbound: mpsc::Receiver<Message>,
    ) {
        while let Some(msg) = outbound.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                debug!("Write to {} failed: {}", client_id, e);
                return;
            }
            if closing {
                return;
            }
        }
        let _ = write.send(Message::Close(None)).await;
    }

    async fn read_loop(
        client_id: String,
        mut read: SplitStream<WebSocketStream<TcpStream>>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let text = match msg {
                        Message::Text(text) => text,
                        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                let _ = event_tx.send(ConnectionEvent::Invalid {
                                    client_id: client_id.clone(),
                                    reason: "binary frame is not UTF-8".into(),
                                });
                                continue;
                            }
                        },
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", client_id);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    if text.len() > MAX_FRAME_SIZE {
                        warn!(
                            "Frame from {} exceeds max size ({} > {}), dropping",
                            client_id,
                            text.len(),
                            MAX_FRAME_SIZE
                        );
                        continue;
                    }

                    let event = match from_text::<ClientFrame>(&text) {
                        Some(frame) => ConnectionEvent::Frame {
                            client_id: client_id.clone(),
                            frame,
                        },
                        None => ConnectionEvent::Invalid {
                            client_id: client_id.clone(),
                            reason: "unrecognized frame".into(),
                        },
                    };
                    let _ = event_tx.send(event);
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", client_id);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", client_id, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", client_id);
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed { client_id });
    }

    /// Queue a frame for the client.
    ///
    /// Fails without waiting if the client's queue is full or its writer
    /// has stopped.
    pub fn send(&self, frame: &RelayFrame) -> Result<()> {
        let text = to_text(frame)?;
        match self.outbound.try_send(Message::Text(text)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow!("outbound queue full")),
            Err(TrySendError::Closed(_)) => Err(anyhow!("connection writer stopped")),
        }
    }

    /// Close the connection, gracefully unless its queue is backed up.
    pub fn close(&mut self) {
        if self.outbound.try_send(Message::Close(None)).is_err() {
            self.write_task.abort();
        }
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
