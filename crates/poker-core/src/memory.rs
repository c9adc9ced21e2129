//! In-process channel hub.
//!
//! `LocalHub` hands out `LocalChannel` transports that share named channels
//! inside one process. Delivery is synchronous and in publish order, every
//! publish is echoed to the publisher, and presence behaves like a hosted
//! service: a client that drops off is removed from the set and the
//! remaining members see a `leave`.
//!
//! Connection loss can be simulated with `LocalChannel::disconnect` and
//! `LocalChannel::reconnect`. Messages published while a client is
//! disconnected are not replayed to it.

use crate::transport::{
    ChannelMessage, ChannelState, ChannelTransport, ConnectionState, PresenceMember, Result,
    TransportError, TransportSignal,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace};

struct Subscriber {
    tx: mpsc::UnboundedSender<TransportSignal>,
    connected: bool,
}

#[derive(Default)]
struct Room {
    subscribers: HashMap<String, Subscriber>,
    /// Present members in entry order, keyed by client ID
    presence: Vec<(String, PresenceMember)>,
}

impl Room {
    fn broadcast(&mut self, signal: &TransportSignal) {
        // A closed receiver means the subscriber went away without detaching.
        self.subscribers
            .retain(|_, sub| !sub.connected || sub.tx.send(signal.clone()).is_ok());
    }

    fn remove_presence(&mut self, client_id: &str) -> Option<PresenceMember> {
        let pos = self.presence.iter().position(|(c, _)| c == client_id)?;
        Some(self.presence.remove(pos).1)
    }
}

/// Shared registry of in-process channels.
#[derive(Clone, Default)]
pub struct LocalHub {
    rooms: Arc<Mutex<HashMap<String, Room>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for `client_id` on the named channel.
    pub fn channel(
        &self,
        channel_name: impl Into<String>,
        client_id: impl Into<String>,
    ) -> LocalChannel {
        LocalChannel {
            rooms: Arc::clone(&self.rooms),
            name: channel_name.into(),
            client_id: client_id.into(),
            state: Mutex::new(ChannelState::Initialized),
        }
    }

    /// Number of present members on a channel.
    pub fn presence_count(&self, channel_name: &str) -> usize {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel_name)
            .map(|room| room.presence.len())
            .unwrap_or(0)
    }
}

/// One client's view of a `LocalHub` channel.
pub struct LocalChannel {
    rooms: Arc<Mutex<HashMap<String, Room>>>,
    name: String,
    client_id: String,
    state: Mutex<ChannelState>,
}

impl LocalChannel {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn with_room<T>(&self, f: impl FnOnce(&mut Room) -> T) -> T {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        f(rooms.entry(self.name.clone()).or_default())
    }

    fn ensure_connected(&self, room: &Room) -> Result<()> {
        match room.subscribers.get(&self.client_id) {
            Some(sub) if sub.connected => Ok(()),
            Some(_) => Err(TransportError::ConnectionFailed(format!(
                "{} is disconnected",
                self.client_id
            ))),
            None => Err(TransportError::NotAttached(self.name.clone())),
        }
    }

    /// Simulate losing the connection.
    ///
    /// The client is told it is suspended, and its presence entry is
    /// dropped as if the service timed it out.
    pub fn disconnect(&self) {
        self.set_state(ChannelState::Suspended);
        self.with_room(|room| {
            let Some(sub) = room.subscribers.get_mut(&self.client_id) else {
                return;
            };
            let _ = sub
                .tx
                .send(TransportSignal::ConnectionChanged(ConnectionState::Suspended));
            sub.connected = false;

            if let Some(member) = room.remove_presence(&self.client_id) {
                room.broadcast(&TransportSignal::PresenceLeave(member));
            }
        });
        debug!("{} disconnected from {}", self.client_id, self.name);
    }

    /// Simulate the connection coming back.
    pub fn reconnect(&self) {
        self.with_room(|room| {
            if let Some(sub) = room.subscribers.get_mut(&self.client_id) {
                sub.connected = true;
                let _ = sub
                    .tx
                    .send(TransportSignal::ConnectionChanged(ConnectionState::Connected));
            }
        });
        self.set_state(ChannelState::Attached);
        debug!("{} reconnected to {}", self.client_id, self.name);
    }
}

#[async_trait]
impl ChannelTransport for LocalChannel {
    fn channel_name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn attach(&self) -> Result<mpsc::UnboundedReceiver<TransportSignal>> {
        self.set_state(ChannelState::Attaching);
        let (tx, rx) = mpsc::unbounded_channel();
        self.with_room(|room| {
            room.subscribers
                .insert(self.client_id.clone(), Subscriber { tx, connected: true });
        });
        self.set_state(ChannelState::Attached);
        debug!("{} attached to {}", self.client_id, self.name);
        Ok(rx)
    }

    async fn detach(&self) -> Result<()> {
        self.with_room(|room| {
            room.subscribers.remove(&self.client_id);
            if let Some(member) = room.remove_presence(&self.client_id) {
                room.broadcast(&TransportSignal::PresenceLeave(member));
            }
        });
        self.set_state(ChannelState::Detached);
        debug!("{} detached from {}", self.client_id, self.name);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        if !self.state().can_publish() {
            return Err(TransportError::NotAttached(self.name.clone()));
        }
        self.with_room(|room| {
            self.ensure_connected(room)?;
            trace!("{} publishing {} on {}", self.client_id, topic, self.name);
            room.broadcast(&TransportSignal::Message(ChannelMessage {
                topic: topic.to_string(),
                payload,
                client_id: self.client_id.clone(),
            }));
            Ok(())
        })
    }

    async fn presence_enter(&self, member: PresenceMember) -> Result<()> {
        self.with_room(|room| {
            self.ensure_connected(room)
                .map_err(|e| TransportError::Presence(e.to_string()))?;
            room.remove_presence(&self.client_id);
            room.presence.push((self.client_id.clone(), member.clone()));
            room.broadcast(&TransportSignal::PresenceEnter(member));
            Ok(())
        })
    }

    async fn presence_leave(&self) -> Result<()> {
        self.with_room(|room| {
            if let Some(member) = room.remove_presence(&self.client_id) {
                room.broadcast(&TransportSignal::PresenceLeave(member));
            }
        });
        Ok(())
    }

    async fn presence_members(&self) -> Result<Vec<PresenceMember>> {
        self.with_room(|room| {
            self.ensure_connected(room)
                .map_err(|e| TransportError::Presence(e.to_string()))?;
            Ok(room.presence.iter().map(|(_, m)| m.clone()).collect())
        })
    }
}
