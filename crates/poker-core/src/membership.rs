//! Membership bridge: presence signals to session events.
//!
//! Presence is observed by every client, but the reducer only sees what is
//! broadcast on the channel. The bridge turns `enter`/`leave` into
//! `ParticipantJoined`/`ParticipantLeft` events for broadcast, and replays
//! the members that were already present each time we attach.
//!
//! Our own presence churn is never announced by us; peers observe it and
//! announce it on our behalf. A participant announced by both the replay and
//! a live `enter` is only announced once per client. Duplicates across
//! clients are absorbed by the reducer's idempotent join handling.

use crate::ids::ParticipantId;
use crate::reducer::Event;
use crate::transport::PresenceMember;
use std::collections::HashSet;
use tracing::debug;

pub struct MembershipBridge {
    local: ParticipantId,
    /// Participants this client has announced and not yet seen leave
    announced: HashSet<ParticipantId>,
    replayed: bool,
}

impl MembershipBridge {
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            announced: HashSet::new(),
            replayed: false,
        }
    }

    /// Forget everything announced. Call when our own link drops.
    pub fn reset(&mut self) {
        self.announced.clear();
        self.replayed = false;
    }

    /// Map a live presence `enter`.
    pub fn on_enter(&mut self, member: &PresenceMember) -> Option<Event> {
        if member.participant_id == self.local {
            debug!("Ignoring own presence enter");
            return None;
        }
        if !self.announced.insert(member.participant_id.clone()) {
            debug!(
                "Presence enter for {} already announced",
                member.participant_id
            );
            return None;
        }
        Some(Event::ParticipantJoined {
            participant: member.participant(),
        })
    }

    /// Map a live presence `leave`.
    pub fn on_leave(&mut self, member: &PresenceMember) -> Option<Event> {
        if member.participant_id == self.local {
            debug!("Ignoring own presence leave");
            return None;
        }
        self.announced.remove(&member.participant_id);
        Some(Event::ParticipantLeft {
            participant_id: member.participant_id.clone(),
        })
    }

    /// Replay the members present at attach as joins.
    ///
    /// Only the first call after construction or `reset` produces events.
    pub fn replay(&mut self, members: &[PresenceMember]) -> Vec<Event> {
        if self.replayed {
            return Vec::new();
        }
        self.replayed = true;
        members
            .iter()
            .filter_map(|member| self.on_enter(member))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Participant;

    fn member(id: &str, name: &str) -> PresenceMember {
        PresenceMember::from(&Participant::new(id, name))
    }

    fn bridge() -> MembershipBridge {
        MembershipBridge::new("me".into())
    }

    #[test]
    fn test_enter_maps_to_join() {
        let mut b = bridge();
        assert_eq!(
            b.on_enter(&member("p1", "Al")),
            Some(Event::ParticipantJoined {
                participant: Participant::new("p1", "Al")
            })
        );
    }

    #[test]
    fn test_leave_maps_to_left() {
        let mut b = bridge();
        assert_eq!(
            b.on_leave(&member("p1", "Al")),
            Some(Event::ParticipantLeft {
                participant_id: "p1".into()
            })
        );
    }

    #[test]
    fn test_own_churn_is_suppressed() {
        let mut b = bridge();
        assert_eq!(b.on_enter(&member("me", "Me")), None);
        assert_eq!(b.on_leave(&member("me", "Me")), None);
    }

    #[test]
    fn test_duplicate_enter_announced_once() {
        let mut b = bridge();
        assert!(b.on_enter(&member("p1", "Al")).is_some());
        assert!(b.on_enter(&member("p1", "Al")).is_none());
    }

    #[test]
    fn test_reenter_after_leave_is_announced() {
        let mut b = bridge();
        b.on_enter(&member("p1", "Al"));
        b.on_leave(&member("p1", "Al"));
        assert!(b.on_enter(&member("p1", "Al")).is_some());
    }

    #[test]
    fn test_replay_excludes_self_and_dedups_with_live_enter() {
        let mut b = bridge();
        b.on_enter(&member("p2", "Bo"));

        let events = b.replay(&[member("me", "Me"), member("p1", "Al"), member("p2", "Bo")]);
        assert_eq!(
            events,
            vec![Event::ParticipantJoined {
                participant: Participant::new("p1", "Al")
            }]
        );

        // Live enter after replay is not re-announced.
        assert!(b.on_enter(&member("p1", "Al")).is_none());
    }

    #[test]
    fn test_replay_happens_once() {
        let mut b = bridge();
        assert_eq!(b.replay(&[member("p1", "Al")]).len(), 1);
        assert!(b.replay(&[member("p3", "Cy")]).is_empty());
    }

    #[test]
    fn test_reset_allows_reannounce_and_replay() {
        let mut b = bridge();
        assert_eq!(b.replay(&[member("p1", "Al")]).len(), 1);

        // p1 left and came back while our link was down.
        b.reset();
        assert!(b.on_enter(&member("p1", "Al")).is_some());

        b.reset();
        assert_eq!(
            b.replay(&[member("p1", "Al"), member("p2", "Bo")]),
            vec![
                Event::ParticipantJoined {
                    participant: Participant::new("p1", "Al")
                },
                Event::ParticipantJoined {
                    participant: Participant::new("p2", "Bo")
                },
            ]
        );
    }
}
