//! Two-party audio/video call signaling over a relay.
//!
//! Two peers discover each other's transient relay identity, exchange
//! opaque session-description envelopes and call intent through a relay
//! that never sees media, and converge on a live peer connection. The
//! relay, the capture hardware and the media engine are all external
//! collaborators behind traits; this crate is the signaling protocol and
//! the client-side call state machine.

pub mod calls;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod test_utils;
pub mod transport;

pub use calls::{
    CallError, CallManager, CallRole, CallState, EndReason, MediaError, MediaHandle, MediaSource,
    PeerTransport, PeerTransportEvent, PeerTransportFactory, SignalingEnvelope,
};
pub use client::RelayClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use events::{Event, EventBus, EventHandler};
pub use identity::SessionIdentity;
pub use transport::{TokioWebSocketTransportFactory, Transport, TransportFactory};
