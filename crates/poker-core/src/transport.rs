//! Channel transport contract.
//!
//! The session core never talks to the network directly. It needs a named
//! publish/subscribe channel with presence, delivered reliably and in order
//! per sender (no global order across senders, duplicates possible).
//!
//! Implementations:
//! - `LocalHub`: in-process hub for tests and single-process demos
//! - `WsTransport` (poker-relay): WebSocket client for the relay server

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::ids::ParticipantId;
use crate::model::Participant;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Channel not attached: {0}")]
    NotAttached(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Presence error: {0}")]
    Presence(String),

    #[error("Transport error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Connection-level state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Suspended,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Channel attachment state; publishing is only allowed while attaching or
/// attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detached,
    Suspended,
    Failed,
}

impl ChannelState {
    pub fn can_publish(&self) -> bool {
        matches!(self, Self::Attaching | Self::Attached)
    }
}

/// Presence metadata each member enters with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMember {
    pub participant_id: ParticipantId,
    pub participant_name: String,
}

impl PresenceMember {
    pub fn participant(&self) -> Participant {
        Participant {
            id: self.participant_id.clone(),
            name: self.participant_name.clone(),
        }
    }
}

impl From<&Participant> for PresenceMember {
    fn from(p: &Participant) -> Self {
        Self {
            participant_id: p.id.clone(),
            participant_name: p.name.clone(),
        }
    }
}

/// A raw message delivered on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    /// Topic the message was published under
    pub topic: String,
    /// JSON payload
    pub payload: serde_json::Value,
    /// Transport-level ID of the publishing client
    pub client_id: String,
}

/// Everything a transport delivers to a subscriber, on one ordered queue.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Message(ChannelMessage),
    PresenceEnter(PresenceMember),
    PresenceLeave(PresenceMember),
    ConnectionChanged(ConnectionState),
}

/// A named publish/subscribe channel with presence.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Channel name (e.g. "game:AB12CD34")
    fn channel_name(&self) -> &str;

    /// Current attachment state
    fn state(&self) -> ChannelState;

    /// Attach and subscribe. All subsequent signals arrive on the returned
    /// receiver, in delivery order.
    async fn attach(&self) -> Result<mpsc::UnboundedReceiver<TransportSignal>>;

    /// Unsubscribe and detach.
    async fn detach(&self) -> Result<()>;

    /// Publish a payload under a topic. Subscribers, including the
    /// publisher, receive it.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()>;

    /// Announce ourselves in the presence set.
    async fn presence_enter(&self, member: PresenceMember) -> Result<()>;

    /// Leave the presence set.
    async fn presence_leave(&self) -> Result<()>;

    /// Currently present members.
    async fn presence_members(&self) -> Result<Vec<PresenceMember>>;
}
