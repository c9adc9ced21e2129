//! Notification infrastructure for poker-core.
//!
//! Provides `SessionEvent` for UI and monitoring, and `EventBus` for
//! subscriptions. The bus is thread-safe: wrap it in `Arc` to subscribe.

use crate::bootstrap::BootstrapSource;
use crate::ids::ParticipantId;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Notifications emitted by a running session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The local `SessionState` was replaced or evolved.
    StateChanged,
    /// Transport connectivity flipped.
    ConnectionChanged { connected: bool },
    /// First state acquired.
    BootstrapCompleted { source: BootstrapSource },
    /// A snapshot arrived from a different self-declared authority.
    ///
    /// The snapshot is still adopted (last snapshot wins); this only flags
    /// that two authorities exist for the session.
    AuthorityConflict {
        local: ParticipantId,
        remote: ParticipantId,
    },
    /// No state after the join timeout; the UI should offer a way out.
    JoinTimedOut,
    /// Inbound message accepted from the channel.
    MessageReceived { topic: String },
    /// Outbound publish dropped because the channel could not publish.
    PublishDropped { topic: String },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Event bus for publishing session events to subscribers.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while emit() holds the read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SessionEvent) {
        // Clone the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let _sub = bus.subscribe(move |event| {
            seen_clone.lock().unwrap().push(event);
        });

        bus.emit(SessionEvent::ConnectionChanged { connected: true });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SessionEvent::ConnectionChanged { connected: true }]
        );
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(SessionEvent::StateChanged);
            assert_eq!(bus.subscriber_count(), 1);
        }

        bus.emit(SessionEvent::StateChanged);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_partial_unsubscribe() {
        let bus = Arc::new(EventBus::new());
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count1);
        let c2 = Arc::clone(&count2);

        let sub1 = bus.subscribe(move |_| {
            c1.fetch_add(1, Ordering::Relaxed);
        });
        let _sub2 = bus.subscribe(move |_| {
            c2.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(SessionEvent::JoinTimedOut);
        drop(sub1);
        bus.emit(SessionEvent::JoinTimedOut);

        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_session_event_serialization() {
        let json = serde_json::to_string(&SessionEvent::AuthorityConflict {
            local: "p1".into(),
            remote: "p2".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"authorityConflict\""));
        assert!(json.contains("\"local\":\"p1\""));

        let json = serde_json::to_string(&SessionEvent::BootstrapCompleted {
            source: BootstrapSource::SelfInitialized,
        })
        .unwrap();
        assert!(json.contains("\"source\":\"selfInitialized\""));
    }
}
