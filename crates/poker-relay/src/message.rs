//! Relay wire frames.
//!
//! Every frame is a JSON object sent as a WebSocket text frame. Client
//! frames are tagged by `action`, relay frames by `kind`.

use poker_core::PresenceMember;
use serde::{Deserialize, Serialize};

/// Maximum frame size (1MB). Larger frames are dropped unread.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Client to relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Attach {
        channel: String,
    },
    Detach {
        channel: String,
    },
    Publish {
        channel: String,
        topic: String,
        payload: serde_json::Value,
    },
    PresenceEnter {
        channel: String,
        member: PresenceMember,
    },
    PresenceLeave {
        channel: String,
    },
    PresenceGet {
        channel: String,
    },
}

impl ClientFrame {
    pub fn channel(&self) -> &str {
        match self {
            Self::Attach { channel }
            | Self::Detach { channel }
            | Self::Publish { channel, .. }
            | Self::PresenceEnter { channel, .. }
            | Self::PresenceLeave { channel }
            | Self::PresenceGet { channel } => channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresenceAction {
    Enter,
    Leave,
}

/// Relay to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RelayFrame {
    /// Attach acknowledged; `client_id` identifies this connection in
    /// `message` frames.
    Attached {
        channel: String,
        client_id: String,
    },
    Message {
        channel: String,
        topic: String,
        payload: serde_json::Value,
        client_id: String,
    },
    Presence {
        channel: String,
        action: PresenceAction,
        member: PresenceMember,
    },
    PresenceMembers {
        channel: String,
        members: Vec<PresenceMember>,
    },
    Error {
        message: String,
    },
}

impl RelayFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Encode a frame as JSON text.
pub fn to_text<T: Serialize>(frame: &T) -> serde_json::Result<String> {
    serde_json::to_string(frame)
}

/// Parse a frame, returning None for anything that is not a known frame.
pub fn from_text<T: for<'de> Deserialize<'de>>(text: &str) -> Option<T> {
    serde_json::from_str(text).ok()
}
