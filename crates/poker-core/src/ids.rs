//! Session and participant identifiers.
//!
//! Both are opaque strings on the wire. Generated values use base-36
//! alphabets so they stay short enough to read aloud or paste into a URL.

use rand::Rng;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

const SESSION_ID_LEN: usize = 8;
const PARTICIPANT_ID_LEN: usize = 13;

const UPPER_BASE36: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const LOWER_BASE36: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Identifier cannot be empty")]
    Empty,
    #[error("Identifier cannot contain whitespace: {0:?}")]
    Whitespace(String),
}

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

fn validate(s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }
    if s.chars().any(char::is_whitespace) {
        return Err(IdError::Whitespace(s.to_string()));
    }
    Ok(())
}

/// Identifier of one shared voting room.
///
/// # Examples
/// ```
/// use poker_core::SessionId;
///
/// let id = SessionId::generate();
/// assert_eq!(id.as_str().len(), 8);
///
/// let parsed: SessionId = "ab12cd34".parse().unwrap();
/// assert_eq!(parsed.as_str(), "AB12CD34");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random session ID.
    pub fn generate() -> Self {
        Self(random_string(UPPER_BASE36, SESSION_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the transport channel that carries this session.
    pub fn channel_name(&self) -> String {
        format!("game:{}", self.0)
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate(s)?;
        Ok(Self(s.to_ascii_uppercase()))
    }
}

impl<'de> serde::Deserialize<'de> for SessionId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Client-generated identity of a participant.
///
/// Uniqueness is assumed, never verified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Generate a new random participant ID.
    pub fn generate() -> Self {
        Self(random_string(LOWER_BASE36, PARTICIPANT_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ParticipantId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Generate a fresh issue ID.
pub fn generate_issue_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
