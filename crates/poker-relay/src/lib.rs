//! poker-relay library: WebSocket relay and client transport.
//!
//! The relay is a minimal pub/sub hub with presence. It knows nothing
//! about planning poker; clients run `poker_core::Session` over
//! `WsTransport`.

pub mod connection;
pub mod console;
pub mod message;
pub mod reconnect;
pub mod registry;
pub mod server;
pub mod transport;

// Re-export key types for convenience
pub use connection::{ClientConnection, ConnectionEvent};
pub use message::{ClientFrame, MAX_FRAME_SIZE, PresenceAction, RelayFrame};
pub use reconnect::ReconnectConfig;
pub use registry::Registry;
pub use server::RelayServer;
pub use transport::WsTransport;
