//! Call signaling and the call state machine.
//!
//! This module carries a call attempt from idle through ringing,
//! connecting and active to ended, reacting to local user actions and to
//! signaling pushed through the relay. The relay never sees media; it only
//! forwards opaque session-description envelopes between two transient
//! identities.
//!
//! # Architecture
//!
//! - [`SignalingEnvelope`], [`CallInvite`], [`CallAccept`]: the wire data
//!   model, transported as tagged JSON frames
//! - [`CallState`] & [`CallSession`]: state machine for one call attempt
//! - [`CallManager`]: owns the single session and drives the engine
//! - [`PeerTransport`]: the four-operation seam to the media engine
//! - [`MediaSource`]: the local capture seam
//!
//! Both seams are capability traits with fakes in `test_utils`, so the
//! state machine is testable without any real engine.

pub mod error;
pub(crate) mod handler;
pub mod manager;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod state;

pub use error::CallError;
pub use manager::CallManager;
pub use media::{MediaError, MediaHandle, MediaSource};
pub use peer::{PeerTransport, PeerTransportEvent, PeerTransportFactory};
pub use signaling::{CallAccept, CallInvite, SignalingEnvelope, SignalingRouter};
pub use state::{CallRole, CallSession, CallState, CallTransition, EndReason, InvalidTransition};
