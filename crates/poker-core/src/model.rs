//! Replicated session entities.
//!
//! These types are the JSON wire shape of a `game-state` snapshot, so field
//! names and optionality here are part of the protocol.

use crate::ids::{ParticipantId, SessionId, generate_issue_id};
use serde::{Deserialize, Serialize};

/// Someone taking part in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Non-numeric vote markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteMarker {
    /// "I don't know"
    Unsure,
    /// "Skip me this round"
    Pass,
}

/// Value carried by a vote: a point value or one of the markers.
///
/// Wire format is a bare number, `"unsure"` or `"pass"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoteValue {
    Points(f64),
    Marker(VoteMarker),
}

impl VoteValue {
    pub const UNSURE: Self = Self::Marker(VoteMarker::Unsure);
    pub const PASS: Self = Self::Marker(VoteMarker::Pass);

    /// Numeric value, if this is a point vote.
    pub fn points(&self) -> Option<f64> {
        match self {
            Self::Points(p) => Some(*p),
            Self::Marker(_) => None,
        }
    }
}

impl From<f64> for VoteValue {
    fn from(points: f64) -> Self {
        Self::Points(points)
    }
}

/// One participant's vote in the current round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub participant_id: ParticipantId,
    pub participant_name: String,
    /// `None` serializes as `null`: voted, but without a value.
    pub value: Option<VoteValue>,
    pub revealed: bool,
}

impl Vote {
    /// A hidden vote cast by `participant`.
    pub fn cast(participant: &Participant, value: Option<VoteValue>) -> Self {
        Self {
            participant_id: participant.id.clone(),
            participant_name: participant.name.clone(),
            value,
            revealed: false,
        }
    }
}

/// Something to estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Only set by an `IssueEstimated` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<f64>,
}

impl Issue {
    /// Create an unestimated issue with a fresh ID.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: generate_issue_id(),
            title: title.into(),
            description: None,
            estimate: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The replicated aggregate every client converges on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: SessionId,
    /// Fixed at creation; the only participant that broadcasts snapshots.
    pub authority_id: ParticipantId,
    pub participants: Vec<Participant>,
    pub current_issue: Option<Issue>,
    pub votes: Vec<Vote>,
    pub voting_in_progress: bool,
    pub votes_revealed: bool,
    pub issues: Vec<Issue>,
}

impl SessionState {
    /// Fresh state with `creator` as sole participant and authority.
    pub fn new(session_id: SessionId, creator: Participant) -> Self {
        Self {
            session_id,
            authority_id: creator.id.clone(),
            participants: vec![creator],
            current_issue: None,
            votes: Vec::new(),
            voting_in_progress: false,
            votes_revealed: false,
            issues: Vec::new(),
        }
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    pub fn has_participant(&self, id: &ParticipantId) -> bool {
        self.participant(id).is_some()
    }

    pub fn vote_of(&self, id: &ParticipantId) -> Option<&Vote> {
        self.votes.iter().find(|v| &v.participant_id == id)
    }

    pub fn issue(&self, id: &str) -> Option<&Issue> {
        self.issues.iter().find(|i| i.id == id)
    }

    /// Check the structural invariants of the aggregate.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (i, vote) in self.votes.iter().enumerate() {
            if self.votes[..i]
                .iter()
                .any(|v| v.participant_id == vote.participant_id)
            {
                return Err(format!("duplicate vote for {}", vote.participant_id));
            }
        }
        for (i, participant) in self.participants.iter().enumerate() {
            if self.participants[..i].iter().any(|p| p.id == participant.id) {
                return Err(format!("duplicate participant {}", participant.id));
            }
        }
        if self.votes_revealed && !self.voting_in_progress {
            return Err("votes revealed outside a voting round".to_string());
        }
        Ok(())
    }
}
