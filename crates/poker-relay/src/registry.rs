//! Channel and presence bookkeeping for the relay.
//!
//! The registry performs no I/O. Each operation returns the frames to
//! deliver, addressed by client ID, and the server writes them out in
//! order. Since one task applies every operation, all subscribers of a
//! channel see its messages in the same order.

use crate::message::{ClientFrame, PresenceAction, RelayFrame};
use poker_core::PresenceMember;
use std::collections::HashMap;
use tracing::debug;

/// A frame addressed to one client.
pub type Delivery = (String, RelayFrame);

#[derive(Debug, Default)]
struct Channel {
    /// Client IDs in attach order
    subscribers: Vec<String>,
    /// Present members in entry order, keyed by client ID
    presence: Vec<(String, PresenceMember)>,
}

impl Channel {
    fn is_subscribed(&self, client_id: &str) -> bool {
        self.subscribers.iter().any(|c| c == client_id)
    }

    fn fan_out(&self, frame: RelayFrame) -> Vec<Delivery> {
        self.subscribers
            .iter()
            .map(|c| (c.clone(), frame.clone()))
            .collect()
    }

    fn leave(&mut self, channel: &str, client_id: &str) -> Vec<Delivery> {
        let Some(pos) = self.presence.iter().position(|(c, _)| c == client_id) else {
            return Vec::new();
        };
        let (_, member) = self.presence.remove(pos);
        self.fan_out(RelayFrame::Presence {
            channel: channel.to_string(),
            action: PresenceAction::Leave,
            member,
        })
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    channels: HashMap<String, Channel>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one client frame.
    pub fn handle(&mut self, client_id: &str, frame: ClientFrame) -> Vec<Delivery> {
        match frame {
            ClientFrame::Attach { channel } => self.attach(client_id, channel),
            ClientFrame::Detach { channel } => self.detach(client_id, &channel),
            ClientFrame::Publish {
                channel,
                topic,
                payload,
            } => {
                let Some(entry) = self.subscribed(client_id, &channel) else {
                    return not_attached(client_id, &channel);
                };
                entry.fan_out(RelayFrame::Message {
                    channel,
                    topic,
                    payload,
                    client_id: client_id.to_string(),
                })
            }
            ClientFrame::PresenceEnter { channel, member } => {
                let Some(entry) = self.subscribed(client_id, &channel) else {
                    return not_attached(client_id, &channel);
                };
                entry.presence.retain(|(c, _)| c != client_id);
                entry.presence.push((client_id.to_string(), member.clone()));
                entry.fan_out(RelayFrame::Presence {
                    channel,
                    action: PresenceAction::Enter,
                    member,
                })
            }
            ClientFrame::PresenceLeave { channel } => match self.channels.get_mut(&channel) {
                Some(entry) => entry.leave(&channel, client_id),
                None => Vec::new(),
            },
            ClientFrame::PresenceGet { channel } => {
                let Some(entry) = self.subscribed(client_id, &channel) else {
                    return not_attached(client_id, &channel);
                };
                let members = entry.presence.iter().map(|(_, m)| m.clone()).collect();
                vec![(
                    client_id.to_string(),
                    RelayFrame::PresenceMembers { channel, members },
                )]
            }
        }
    }

    /// Drop a client from every channel, as when its socket closes.
    pub fn disconnect(&mut self, client_id: &str) -> Vec<Delivery> {
        let channels: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, c)| c.is_subscribed(client_id))
            .map(|(name, _)| name.clone())
            .collect();

        channels
            .iter()
            .flat_map(|name| self.detach(client_id, name))
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    pub fn presence(&self, channel: &str) -> Vec<PresenceMember> {
        self.channels
            .get(channel)
            .map(|c| c.presence.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    fn attach(&mut self, client_id: &str, channel: String) -> Vec<Delivery> {
        let entry = self.channels.entry(channel.clone()).or_default();
        if !entry.is_subscribed(client_id) {
            entry.subscribers.push(client_id.to_string());
        }
        debug!("{} attached to {}", client_id, channel);
        vec![(
            client_id.to_string(),
            RelayFrame::Attached {
                channel,
                client_id: client_id.to_string(),
            },
        )]
    }

    fn detach(&mut self, client_id: &str, channel: &str) -> Vec<Delivery> {
        let Some(entry) = self.channels.get_mut(channel) else {
            return Vec::new();
        };
        entry.subscribers.retain(|c| c != client_id);
        let deliveries = entry.leave(channel, client_id);
        if entry.subscribers.is_empty() {
            self.channels.remove(channel);
            debug!("Channel {} is empty, dropping it", channel);
        }
        deliveries
    }

    fn subscribed(&mut self, client_id: &str, channel: &str) -> Option<&mut Channel> {
        self.channels
            .get_mut(channel)
            .filter(|c| c.is_subscribed(client_id))
    }
}

fn not_attached(client_id: &str, channel: &str) -> Vec<Delivery> {
    vec![(
        client_id.to_string(),
        RelayFrame::error(format!("Not attached to {}", channel)),
    )]
}
