//! `ChannelTransport` over a relay WebSocket.
//!
//! `attach()` connects, then hands the socket to a link task that owns it
//! for the life of the attachment. The link forwards relay frames as
//! `TransportSignal`s and writes outbound frames in request order. When
//! the socket drops, the link reports `Disconnected`, reconnects with
//! exponential backoff, re-attaches and reports `Connected`. Presence is
//! not restored by the link; the session re-enters on `Connected`.

use crate::message::{ClientFrame, MAX_FRAME_SIZE, PresenceAction, RelayFrame, from_text, to_text};
use crate::reconnect::{ReconnectConfig, calculate_backoff};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use poker_core::transport::Result;
use poker_core::{
    ChannelMessage, ChannelState, ChannelTransport, ConnectionState, PresenceMember,
    TransportError, TransportSignal,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

/// How long to wait for a `presenceMembers` reply.
pub const PRESENCE_GET_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum LinkRequest {
    Send(ClientFrame),
    Members(oneshot::Sender<Vec<PresenceMember>>),
    Close(oneshot::Sender<()>),
}

struct LinkHandle {
    requests: mpsc::UnboundedSender<LinkRequest>,
    task: JoinHandle<()>,
}

/// Relay client for one channel.
pub struct WsTransport {
    url: String,
    channel: String,
    reconnect: ReconnectConfig,
    state: Arc<StdMutex<ChannelState>>,
    link: Mutex<Option<LinkHandle>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            channel: channel.into(),
            reconnect: ReconnectConfig::default(),
            state: Arc::new(StdMutex::new(ChannelState::Initialized)),
            link: Mutex::new(None),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    async fn request(&self, request: LinkRequest) -> Result<()> {
        let link = self.link.lock().await;
        let Some(link) = link.as_ref() else {
            return Err(TransportError::NotAttached(self.channel.clone()));
        };
        link.requests
            .send(request)
            .map_err(|_| TransportError::NotAttached(self.channel.clone()))
    }

    fn ensure_can_publish(&self) -> Result<()> {
        if self.state().can_publish() {
            Ok(())
        } else {
            Err(TransportError::NotAttached(self.channel.clone()))
        }
    }
}

#[async_trait]
impl ChannelTransport for WsTransport {
    fn channel_name(&self) -> &str {
        &self.channel
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn attach(&self) -> Result<mpsc::UnboundedReceiver<TransportSignal>> {
        let mut guard = self.link.lock().await;
        if guard.is_some() {
            return Err(TransportError::Other(format!(
                "Already attached to {}",
                self.channel
            )));
        }

        self.set_state(ChannelState::Attaching);
        let ws = match connect(&self.url).await {
            Ok(ws) => ws,
            Err(e) => {
                self.set_state(ChannelState::Failed);
                return Err(TransportError::ConnectionFailed(format!("{}: {}", self.url, e)));
            }
        };
        info!("Connected to relay at {}", self.url);

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let link = Link {
            url: self.url.clone(),
            channel: self.channel.clone(),
            reconnect: self.reconnect.clone(),
            state: Arc::clone(&self.state),
            signals: signal_tx,
            members_waiting: VecDeque::new(),
        };
        let task = tokio::spawn(link.run(ws, request_rx));
        *guard = Some(LinkHandle {
            requests: request_tx,
            task,
        });
        Ok(signal_rx)
    }

    async fn detach(&self) -> Result<()> {
        let Some(link) = self.link.lock().await.take() else {
            return Ok(());
        };
        let (done_tx, done_rx) = oneshot::channel();
        if link.requests.send(LinkRequest::Close(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        let _ = link.task.await;
        self.set_state(ChannelState::Detached);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        self.ensure_can_publish()?;
        self.request(LinkRequest::Send(ClientFrame::Publish {
            channel: self.channel.clone(),
            topic: topic.to_string(),
            payload,
        }))
        .await
    }

    async fn presence_enter(&self, member: PresenceMember) -> Result<()> {
        self.ensure_can_publish()
            .map_err(|e| TransportError::Presence(e.to_string()))?;
        self.request(LinkRequest::Send(ClientFrame::PresenceEnter {
            channel: self.channel.clone(),
            member,
        }))
        .await
    }

    async fn presence_leave(&self) -> Result<()> {
        if !self.state().can_publish() {
            return Ok(());
        }
        self.request(LinkRequest::Send(ClientFrame::PresenceLeave {
            channel: self.channel.clone(),
        }))
        .await
    }

    async fn presence_members(&self) -> Result<Vec<PresenceMember>> {
        self.ensure_can_publish()
            .map_err(|e| TransportError::Presence(e.to_string()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(LinkRequest::Members(reply_tx)).await?;
        match tokio::time::timeout(PRESENCE_GET_TIMEOUT, reply_rx).await {
            Ok(Ok(members)) => Ok(members),
            Ok(Err(_)) => Err(TransportError::Presence(
                "connection lost before presence reply".into(),
            )),
            Err(_) => Err(TransportError::Presence("presence request timed out".into())),
        }
    }
}

async fn connect(url: &str) -> std::result::Result<WsStream, WsError> {
    let (ws, _) = connect_async(url).await?;
    Ok(ws)
}

async fn send_frame(
    write: &mut SplitSink<WsStream, Message>,
    frame: &ClientFrame,
) -> std::result::Result<(), WsError> {
    let text = to_text(frame).map_err(|e| WsError::Io(std::io::Error::other(e)))?;
    write.send(Message::Text(text)).await
}

enum LinkExit {
    /// Socket lost; reconnect
    Lost,
    /// Detached on request
    Closed,
}

/// Owns the socket for one attachment.
struct Link {
    url: String,
    channel: String,
    reconnect: ReconnectConfig,
    state: Arc<StdMutex<ChannelState>>,
    signals: mpsc::UnboundedSender<TransportSignal>,
    /// `presenceGet` callers in request order
    members_waiting: VecDeque<oneshot::Sender<Vec<PresenceMember>>>,
}

impl Link {
    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn signal(&self, signal: TransportSignal) {
        let _ = self.signals.send(signal);
    }

    async fn run(mut self, ws: WsStream, mut requests: mpsc::UnboundedReceiver<LinkRequest>) {
        let mut ws = ws;
        loop {
            match self.serve(ws, &mut requests).await {
                LinkExit::Closed => {
                    self.set_state(ChannelState::Detached);
                    debug!("Link to {} closed", self.url);
                    return;
                }
                LinkExit::Lost => {
                    warn!("Lost connection to relay at {}", self.url);
                    self.set_state(ChannelState::Suspended);
                    self.members_waiting.clear();
                    self.signal(TransportSignal::ConnectionChanged(
                        ConnectionState::Disconnected,
                    ));
                }
            }

            match self.reconnect(&mut requests).await {
                Some(next) => {
                    ws = next;
                    self.signal(TransportSignal::ConnectionChanged(ConnectionState::Connected));
                }
                None => return,
            }
        }
    }

    async fn serve(
        &mut self,
        ws: WsStream,
        requests: &mut mpsc::UnboundedReceiver<LinkRequest>,
    ) -> LinkExit {
        let (mut write, mut read) = ws.split();
        let attach = ClientFrame::Attach {
            channel: self.channel.clone(),
        };
        if let Err(e) = send_frame(&mut write, &attach).await {
            warn!("Failed to attach to {}: {}", self.channel, e);
            return LinkExit::Lost;
        }

        loop {
            tokio::select! {
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.on_text(&text),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => self.on_text(&text),
                        Err(_) => warn!("Dropping non-UTF-8 frame from relay"),
                    },
                    Some(Ok(Message::Close(_))) | None => return LinkExit::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        match e {
                            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                                debug!("Relay connection closed");
                            }
                            _ => error!("WebSocket error from relay: {}", e),
                        }
                        return LinkExit::Lost;
                    }
                },

                request = requests.recv() => match request {
                    Some(LinkRequest::Send(frame)) => {
                        if let Err(e) = send_frame(&mut write, &frame).await {
                            warn!("Failed to send {:?}: {}", frame, e);
                            return LinkExit::Lost;
                        }
                    }
                    Some(LinkRequest::Members(reply)) => {
                        self.members_waiting.push_back(reply);
                        let get = ClientFrame::PresenceGet {
                            channel: self.channel.clone(),
                        };
                        if send_frame(&mut write, &get).await.is_err() {
                            return LinkExit::Lost;
                        }
                    }
                    Some(LinkRequest::Close(done)) => {
                        let detach = ClientFrame::Detach {
                            channel: self.channel.clone(),
                        };
                        let _ = send_frame(&mut write, &detach).await;
                        let _ = write.send(Message::Close(None)).await;
                        let _ = done.send(());
                        return LinkExit::Closed;
                    }
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        return LinkExit::Closed;
                    }
                },
            }
        }
    }

    fn on_text(&mut self, text: &str) {
        if text.len() > MAX_FRAME_SIZE {
            warn!(
                "Frame from relay exceeds max size ({} > {}), dropping",
                text.len(),
                MAX_FRAME_SIZE
            );
            return;
        }
        let Some(frame) = from_text::<RelayFrame>(text) else {
            warn!("Unrecognized frame from relay");
            return;
        };

        match frame {
            RelayFrame::Attached { channel, client_id } if channel == self.channel => {
                debug!("Attached to {} as {}", channel, client_id);
                self.set_state(ChannelState::Attached);
            }
            RelayFrame::Message {
                channel,
                topic,
                payload,
                client_id,
            } if channel == self.channel => {
                self.signal(TransportSignal::Message(ChannelMessage {
                    topic,
                    payload,
                    client_id,
                }));
            }
            RelayFrame::Presence {
                channel,
                action,
                member,
            } if channel == self.channel => {
                self.signal(match action {
                    PresenceAction::Enter => TransportSignal::PresenceEnter(member),
                    PresenceAction::Leave => TransportSignal::PresenceLeave(member),
                });
            }
            RelayFrame::PresenceMembers { channel, members } if channel == self.channel => {
                if let Some(reply) = self.members_waiting.pop_front() {
                    let _ = reply.send(members);
                }
            }
            RelayFrame::Error { message } => warn!("Relay error: {}", message),
            other => debug!("Ignoring frame for another channel: {:?}", other),
        }
    }

    /// Reconnect with backoff. Returns None if detached or out of attempts.
    async fn reconnect(
        &mut self,
        requests: &mut mpsc::UnboundedReceiver<LinkRequest>,
    ) -> Option<WsStream> {
        let mut attempt: u32 = 0;
        loop {
            if self.reconnect.exceeded(attempt) {
                error!(
                    "Giving up on relay at {} after {} attempt(s)",
                    self.url, attempt
                );
                self.set_state(ChannelState::Failed);
                self.signal(TransportSignal::ConnectionChanged(ConnectionState::Closed));
                return None;
            }
            attempt += 1;

            let delay = calculate_backoff(attempt, &self.reconnect);
            info!(
                "Reconnecting to {} in {:?} (attempt {})",
                self.url, delay, attempt
            );
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    request = requests.recv() => match request {
                        Some(LinkRequest::Close(done)) => {
                            self.set_state(ChannelState::Detached);
                            let _ = done.send(());
                            return None;
                        }
                        None => {
                            self.set_state(ChannelState::Detached);
                            return None;
                        }
                        Some(_) => debug!("Dropping request while disconnected"),
                    },
                }
            }

            match connect(&self.url).await {
                Ok(ws) => {
                    info!("Reconnected to relay at {}", self.url);
                    self.set_state(ChannelState::Attaching);
                    return Some(ws);
                }
                Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }
}
