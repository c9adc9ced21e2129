//! poker-core: replicated session state for planning poker.
//!
//! This crate provides:
//! - The session domain model and its pure event reducer
//! - Wire encoding for snapshots, events and state requests
//! - Bootstrap, membership and authority rules as sans-IO state machines
//! - A tokio session driver over any `ChannelTransport`
//! - `LocalHub`, an in-process transport for tests and demos

pub mod authority;
pub mod bootstrap;
pub mod config;
pub mod events;
pub mod ids;
pub mod manager;
pub mod membership;
pub mod memory;
pub mod model;
pub mod protocol;
pub mod reducer;
pub mod replica;
pub mod tally;
pub mod transport;

pub use bootstrap::{BootstrapPhase, BootstrapSource, JoinRole};
pub use config::{BootstrapConfig, ConfigError, SessionConfig};
pub use events::{EventBus, SessionEvent, Subscription};
pub use ids::{IdError, ParticipantId, SessionId};
pub use manager::{Session, SessionError, SessionHandle, SessionView};
pub use memory::{LocalChannel, LocalHub};
pub use model::{Issue, Participant, SessionState, Vote, VoteMarker, VoteValue};
pub use protocol::{ProtocolError, WireMessage};
pub use reducer::Event;
pub use replica::{Command, Effect, Replica};
pub use tally::{Card, VoteSummary};
pub use transport::{
    ChannelMessage, ChannelState, ChannelTransport, ConnectionState, PresenceMember,
    TransportError, TransportSignal,
};
