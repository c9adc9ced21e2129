//! Typed wire messages and their (topic, payload) encoding.
//!
//! The transport only knows topics and JSON payloads. This module is the
//! single place where those are mapped to and from typed messages.

use crate::ids::ParticipantId;
use crate::model::SessionState;
use crate::reducer::Event;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TOPIC_STATE: &str = "game-state";
pub const TOPIC_EVENT: &str = "game-event";
pub const TOPIC_REQUEST_STATE: &str = "request-state";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Malformed {topic} payload: {source}")]
    Malformed {
        topic: String,
        source: serde_json::Error,
    },

    #[error("Failed to encode {topic} payload: {source}")]
    Encode {
        topic: String,
        source: serde_json::Error,
    },
}

/// Payload of `request-state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRequest {
    pub participant_id: ParticipantId,
}

/// A message on the session channel.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Snapshot(SessionState),
    Event(Event),
    RequestState(StateRequest),
}

impl WireMessage {
    pub fn request_state(participant_id: ParticipantId) -> Self {
        Self::RequestState(StateRequest { participant_id })
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => TOPIC_STATE,
            Self::Event(_) => TOPIC_EVENT,
            Self::RequestState(_) => TOPIC_REQUEST_STATE,
        }
    }

    /// Encode the payload for `publish(topic, payload)`.
    pub fn to_payload(&self) -> Result<serde_json::Value, ProtocolError> {
        let encoded = match self {
            Self::Snapshot(state) => serde_json::to_value(state),
            Self::Event(event) => serde_json::to_value(event),
            Self::RequestState(request) => serde_json::to_value(request),
        };
        encoded.map_err(|source| ProtocolError::Encode {
            topic: self.topic().to_string(),
            source,
        })
    }

    /// Decode a delivered (topic, payload) pair.
    pub fn decode(topic: &str, payload: &serde_json::Value) -> Result<Self, ProtocolError> {
        let malformed = |source| ProtocolError::Malformed {
            topic: topic.to_string(),
            source,
        };
        match topic {
            TOPIC_STATE => SessionState::deserialize(payload)
                .map(Self::Snapshot)
                .map_err(malformed),
            TOPIC_EVENT => Event::deserialize(payload)
                .map(Self::Event)
                .map_err(malformed),
            TOPIC_REQUEST_STATE => StateRequest::deserialize(payload)
                .map(Self::RequestState)
                .map_err(malformed),
            other => Err(ProtocolError::UnknownTopic(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Issue, Participant, Vote, VoteValue};
    use serde_json::json;

    fn busy_state() -> SessionState {
        let al = Participant::new("p1", "Al");
        let bo = Participant::new("p2", "Bo");
        let issue = Issue::new("Checkout").with_id("i1").with_description("cart flow");
        let mut state = SessionState::new("ROOM".parse().unwrap(), al.clone());
        for event in [
            Event::ParticipantJoined { participant: bo.clone() },
            Event::IssueAdded { issue: issue.clone() },
            Event::VotingStarted { issue },
            Event::VoteSubmitted { vote: Vote::cast(&al, Some(VoteValue::Points(5.0))) },
            Event::VoteSubmitted { vote: Vote::cast(&bo, Some(VoteValue::PASS)) },
            Event::IssueEstimated { issue_id: "i1".into(), estimate: 5.0 },
        ] {
            state = state.apply(&event);
        }
        state
    }

    #[test]
    fn test_snapshot_round_trip_through_reducer() {
        let state = busy_state();
        let msg = WireMessage::Snapshot(state.clone());
        let payload = msg.to_payload().unwrap();

        // Through text, as a real transport would carry it.
        let text = serde_json::to_string(&payload).unwrap();
        let payload: serde_json::Value = serde_json::from_str(&text).unwrap();

        let WireMessage::Snapshot(decoded) = WireMessage::decode(msg.topic(), &payload).unwrap()
        else {
            panic!("expected snapshot");
        };
        assert_eq!(decoded.apply(&Event::Unknown), state);
    }

    #[test]
    fn test_topics() {
        assert_eq!(WireMessage::Snapshot(busy_state()).topic(), "game-state");
        assert_eq!(WireMessage::Event(Event::VotingReset).topic(), "game-event");
        assert_eq!(
            WireMessage::request_state("p1".into()).topic(),
            "request-state"
        );
    }

    #[test]
    fn test_request_state_payload() {
        let payload = WireMessage::request_state("p7".into()).to_payload().unwrap();
        assert_eq!(payload, json!({"participantId": "p7"}));
    }

    #[test]
    fn test_decode_event() {
        let msg = WireMessage::decode(TOPIC_EVENT, &json!({"type": "VOTING_RESET"})).unwrap();
        assert_eq!(msg, WireMessage::Event(Event::VotingReset));
    }

    #[test]
    fn test_decode_unknown_event_tag_is_not_an_error() {
        let msg = WireMessage::decode(TOPIC_EVENT, &json!({"type": "PARTY_MODE"})).unwrap();
        assert_eq!(msg, WireMessage::Event(Event::Unknown));
    }

    #[test]
    fn test_decode_malformed_payloads() {
        let err = WireMessage::decode(TOPIC_EVENT, &json!({"type": "VOTE_SUBMITTED"})).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));

        let err = WireMessage::decode(TOPIC_STATE, &json!({"sessionId": "X"})).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));

        let err = WireMessage::decode(TOPIC_REQUEST_STATE, &json!("p1")).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_decode_unknown_topic() {
        let err = WireMessage::decode("chat", &json!({})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownTopic(t) if t == "chat"));
    }
}
