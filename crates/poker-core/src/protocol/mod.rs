//! Wire protocol for session synchronization.
//!
//! Three topics share one channel:
//! - `game-state`: full `SessionState` snapshot
//! - `game-event`: one tagged `Event`
//! - `request-state`: ask the authority to re-publish its snapshot

pub mod envelope;

pub use envelope::{
    ProtocolError, StateRequest, TOPIC_EVENT, TOPIC_REQUEST_STATE, TOPIC_STATE, WireMessage,
};
