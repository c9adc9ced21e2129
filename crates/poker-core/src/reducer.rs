//! Session events and the reducer that folds them onto a `SessionState`.
//!
//! Events are the only mutation vocabulary. Every handler is pure and
//! total: applying an event yields a new state and never fails. The
//! membership and vote handlers are idempotent, so duplicate or reordered
//! deliveries converge on the same result.

use crate::ids::ParticipantId;
use crate::model::{Issue, Participant, SessionState, Vote};
use serde::{Deserialize, Serialize};

/// Incremental mutation intent, carried on the `game-event` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    ParticipantJoined {
        participant: Participant,
    },
    ParticipantLeft {
        #[serde(rename = "participantId")]
        participant_id: ParticipantId,
    },
    VoteSubmitted {
        vote: Vote,
    },
    VotesRevealed {
        votes: Vec<Vote>,
    },
    VotingStarted {
        issue: Issue,
    },
    VotingReset,
    IssueAdded {
        issue: Issue,
    },
    IssueSelected {
        issue: Issue,
    },
    IssueEstimated {
        #[serde(rename = "issueId")]
        issue_id: String,
        estimate: f64,
    },
    /// Any tag this build does not understand.
    #[serde(other)]
    Unknown,
}

impl Event {
    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParticipantJoined { .. } => "PARTICIPANT_JOINED",
            Self::ParticipantLeft { .. } => "PARTICIPANT_LEFT",
            Self::VoteSubmitted { .. } => "VOTE_SUBMITTED",
            Self::VotesRevealed { .. } => "VOTES_REVEALED",
            Self::VotingStarted { .. } => "VOTING_STARTED",
            Self::VotingReset => "VOTING_RESET",
            Self::IssueAdded { .. } => "ISSUE_ADDED",
            Self::IssueSelected { .. } => "ISSUE_SELECTED",
            Self::IssueEstimated { .. } => "ISSUE_ESTIMATED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl SessionState {
    /// Fold one event onto this state, producing the next state.
    pub fn apply(&self, event: &Event) -> SessionState {
        let mut next = self.clone();
        match event {
            Event::ParticipantJoined { participant } => {
                if !next.has_participant(&participant.id) {
                    next.participants.push(participant.clone());
                }
            }
            Event::ParticipantLeft { participant_id } => {
                next.participants.retain(|p| &p.id != participant_id);
                next.votes.retain(|v| &v.participant_id != participant_id);
            }
            Event::VoteSubmitted { vote } => {
                next.votes.retain(|v| v.participant_id != vote.participant_id);
                next.votes.push(vote.clone());
            }
            Event::VotesRevealed { votes } => {
                next.votes = dedup_votes(votes);
                next.votes_revealed = true;
                // A reveal always belongs to a round.
                next.voting_in_progress = true;
            }
            Event::VotingStarted { issue } => {
                next.current_issue = Some(issue.clone());
                next.votes.clear();
                next.voting_in_progress = true;
                next.votes_revealed = false;
            }
            Event::VotingReset => {
                next.votes.clear();
                next.voting_in_progress = false;
                next.votes_revealed = false;
            }
            Event::IssueAdded { issue } => {
                next.issues.push(issue.clone());
            }
            Event::IssueSelected { issue } => {
                next.current_issue = Some(issue.clone());
                next.votes.clear();
                next.voting_in_progress = false;
                next.votes_revealed = false;
            }
            Event::IssueEstimated { issue_id, estimate } => {
                if let Some(issue) = next.issues.iter_mut().find(|i| &i.id == issue_id) {
                    issue.estimate = Some(*estimate);
                }
            }
            Event::Unknown => {}
        }
        next
    }
}

/// Keep the last vote per participant, preserving first-seen order.
fn dedup_votes(votes: &[Vote]) -> Vec<Vote> {
    let mut out: Vec<Vote> = Vec::with_capacity(votes.len());
    for vote in votes {
        match out
            .iter_mut()
            .find(|v| v.participant_id == vote.participant_id)
        {
            Some(existing) => *existing = vote.clone(),
            None => out.push(vote.clone()),
        }
    }
    out
}

/// Reduce an event onto an optional state.
///
/// Without a state there is nothing to fold onto, so the result stays
/// `None`; the caller decides whether the event should trigger a bootstrap
/// request (see [`needs_bootstrap`]).
pub fn reduce(state: Option<&SessionState>, event: &Event) -> Option<SessionState> {
    state.map(|s| s.apply(event))
}

/// Whether an event received without local state should prompt a
/// `request-state` broadcast.
pub fn needs_bootstrap(state: Option<&SessionState>, event: &Event) -> bool {
    state.is_none() && matches!(event, Event::ParticipantJoined { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VoteValue;

    fn al() -> Participant {
        Participant::new("p1", "Al")
    }

    fn bo() -> Participant {
        Participant::new("p2", "Bo")
    }

    fn empty_state() -> SessionState {
        let mut state = SessionState::new("ROOM".parse().unwrap(), al());
        state.participants.clear();
        state
    }

    fn vote(p: &Participant, points: f64) -> Vote {
        Vote::cast(p, Some(VoteValue::Points(points)))
    }

    fn fold(state: SessionState, events: &[Event]) -> SessionState {
        events.iter().fold(state, |s, e| s.apply(e))
    }

    #[test]
    fn test_participant_joined_on_empty_session() {
        let state = empty_state().apply(&Event::ParticipantJoined { participant: al() });
        assert_eq!(state.participants, vec![al()]);
    }

    #[test]
    fn test_participant_joined_is_idempotent() {
        let join = Event::ParticipantJoined { participant: bo() };
        let once = empty_state().apply(&join);
        let twice = once.apply(&join);
        assert_eq!(once.participants, twice.participants);
        assert_eq!(twice.participants.len(), 1);
    }

    #[test]
    fn test_participant_left_removes_vote() {
        let state = fold(
            empty_state(),
            &[
                Event::ParticipantJoined { participant: al() },
                Event::ParticipantJoined { participant: bo() },
                Event::VoteSubmitted { vote: vote(&bo(), 3.0) },
                Event::ParticipantLeft { participant_id: bo().id },
            ],
        );
        assert_eq!(state.participants, vec![al()]);
        assert!(state.votes.is_empty());
    }

    #[test]
    fn test_votes_commute_across_participants() {
        let v1 = Event::VoteSubmitted { vote: vote(&al(), 5.0) };
        let v2 = Event::VoteSubmitted { vote: vote(&bo(), 8.0) };

        let a = fold(empty_state(), &[v1.clone(), v2.clone()]);
        let b = fold(empty_state(), &[v2, v1]);

        let mut left = a.votes.clone();
        let mut right = b.votes.clone();
        left.sort_by(|x, y| x.participant_id.cmp(&y.participant_id));
        right.sort_by(|x, y| x.participant_id.cmp(&y.participant_id));
        assert_eq!(left, right);
    }

    #[test]
    fn test_last_vote_wins_per_participant() {
        let state = fold(
            empty_state(),
            &[
                Event::VoteSubmitted { vote: vote(&al(), 5.0) },
                Event::VoteSubmitted { vote: vote(&al(), 8.0) },
            ],
        );
        assert_eq!(state.votes.len(), 1);
        assert_eq!(state.votes[0].value, Some(VoteValue::Points(8.0)));
    }

    #[test]
    fn test_full_round_reveal() {
        let issue = Issue::new("X").with_id("x");
        let mut revealed = vec![vote(&al(), 5.0), vote(&bo(), 8.0)];
        for v in &mut revealed {
            v.revealed = true;
        }
        let state = fold(
            empty_state(),
            &[
                Event::VotingStarted { issue: issue.clone() },
                Event::VoteSubmitted { vote: vote(&al(), 5.0) },
                Event::VoteSubmitted { vote: vote(&bo(), 8.0) },
                Event::VotesRevealed { votes: revealed },
            ],
        );
        assert!(state.votes_revealed);
        assert!(state.voting_in_progress);
        assert_eq!(state.votes.len(), 2);
        assert_eq!(state.current_issue, Some(issue));
    }

    #[test]
    fn test_reset_after_reveal_keeps_issue() {
        let issue = Issue::new("X").with_id("x");
        let state = fold(
            empty_state(),
            &[
                Event::VotingStarted { issue: issue.clone() },
                Event::VoteSubmitted { vote: vote(&al(), 5.0) },
                Event::VotesRevealed { votes: vec![vote(&al(), 5.0)] },
                Event::VotingReset,
            ],
        );
        assert!(state.votes.is_empty());
        assert!(!state.votes_revealed);
        assert!(!state.voting_in_progress);
        assert_eq!(state.current_issue, Some(issue));
    }

    #[test]
    fn test_reveal_outside_round_keeps_invariant() {
        let state = empty_state().apply(&Event::VotesRevealed { votes: vec![] });
        assert!(state.votes_revealed);
        assert!(state.voting_in_progress);
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_reveal_with_duplicate_votes_dedups() {
        let state = empty_state().apply(&Event::VotesRevealed {
            votes: vec![vote(&al(), 1.0), vote(&al(), 2.0)],
        });
        assert_eq!(state.votes.len(), 1);
        assert_eq!(state.votes[0].value, Some(VoteValue::Points(2.0)));
    }

    #[test]
    fn test_issue_selected_stops_round() {
        let first = Issue::new("A").with_id("a");
        let second = Issue::new("B").with_id("b");
        let state = fold(
            empty_state(),
            &[
                Event::IssueAdded { issue: first.clone() },
                Event::IssueAdded { issue: second.clone() },
                Event::VotingStarted { issue: first },
                Event::VoteSubmitted { vote: vote(&al(), 2.0) },
                Event::IssueSelected { issue: second.clone() },
            ],
        );
        assert_eq!(state.current_issue, Some(second));
        assert!(state.votes.is_empty());
        assert!(!state.voting_in_progress);
        assert_eq!(state.issues.len(), 2);
    }

    #[test]
    fn test_issue_estimated_touches_only_target() {
        let state = fold(
            empty_state(),
            &[
                Event::IssueAdded { issue: Issue::new("one").with_id("i1") },
                Event::IssueAdded { issue: Issue::new("two").with_id("i2") },
                Event::IssueEstimated { issue_id: "i1".into(), estimate: 3.0 },
            ],
        );
        assert_eq!(state.issue("i1").unwrap().estimate, Some(3.0));
        assert_eq!(state.issue("i2").unwrap().estimate, None);
        assert_eq!(state.issue("i1").unwrap().title, "one");
    }

    #[test]
    fn test_issue_estimated_unknown_id_is_noop() {
        let before = empty_state().apply(&Event::IssueAdded {
            issue: Issue::new("one").with_id("i1"),
        });
        let after = before.apply(&Event::IssueEstimated {
            issue_id: "missing".into(),
            estimate: 5.0,
        });
        assert_eq!(before, after);
    }

    #[test]
    fn test_unknown_event_is_noop() {
        let before = empty_state().apply(&Event::ParticipantJoined { participant: al() });
        assert_eq!(before.apply(&Event::Unknown), before);
    }

    #[test]
    fn test_reduce_without_state() {
        let join = Event::ParticipantJoined { participant: al() };
        assert!(reduce(None, &join).is_none());
        assert!(needs_bootstrap(None, &join));
        assert!(!needs_bootstrap(None, &Event::VotingReset));

        let state = empty_state();
        assert!(!needs_bootstrap(Some(&state), &join));
        assert_eq!(reduce(Some(&state), &join).unwrap().participants, vec![al()]);
    }

    #[test]
    fn test_reveal_invariant_holds_for_every_prefix() {
        let issue = Issue::new("X").with_id("x");
        let events = vec![
            Event::ParticipantJoined { participant: al() },
            Event::VotesRevealed { votes: vec![] },
            Event::VotingReset,
            Event::VotingStarted { issue: issue.clone() },
            Event::VoteSubmitted { vote: vote(&al(), 1.0) },
            Event::VotesRevealed { votes: vec![vote(&al(), 1.0)] },
            Event::IssueSelected { issue },
            Event::VotesRevealed { votes: vec![] },
            Event::ParticipantLeft { participant_id: al().id },
        ];
        let mut state = empty_state();
        for event in &events {
            state = state.apply(event);
            assert!(state.check_invariants().is_ok(), "after {}", event.kind());
        }
    }

    // ==================== Wire format ====================

    #[test]
    fn test_event_wire_tags() {
        let json = serde_json::to_value(Event::ParticipantLeft {
            participant_id: "p9".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "PARTICIPANT_LEFT");
        assert_eq!(json["participantId"], "p9");

        let json = serde_json::to_value(Event::IssueEstimated {
            issue_id: "i1".into(),
            estimate: 3.0,
        })
        .unwrap();
        assert_eq!(json["type"], "ISSUE_ESTIMATED");
        assert_eq!(json["issueId"], "i1");

        let json = serde_json::to_string(&Event::VotingReset).unwrap();
        assert_eq!(json, r#"{"type":"VOTING_RESET"}"#);
    }

    #[test]
    fn test_event_parses_participant_joined() {
        let json = r#"{"type":"PARTICIPANT_JOINED","participant":{"id":"p1","name":"Al"}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event, Event::ParticipantJoined { participant: al() });
    }

    #[test]
    fn test_unknown_tag_decodes_to_unknown() {
        let event: Event = serde_json::from_str(r#"{"type":"CONFETTI","amount":3}"#).unwrap();
        assert_eq!(event, Event::Unknown);
    }
}
