//! Peer transport engine seam.
//!
//! The engine that turns a session description into encrypted media flow is
//! a black box behind exactly four operations plus one notification. The
//! exchange is trickle-free: each side produces a single description and no
//! follow-up candidate messages exist. The call state machine is written
//! against these traits only, so it can be driven by a fake in tests.

use super::media::MediaHandle;
use super::signaling::SignalingEnvelope;
use super::state::CallRole;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An event produced by the peer transport engine.
#[derive(Debug, Clone)]
pub enum PeerTransportEvent {
    /// Inbound media is flowing. Fires once, asynchronously, with no
    /// ordering guarantee relative to the description exchange.
    RemoteMediaArrived(MediaHandle),
}

/// One peer connection attempt, bound to a single call session.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Caller role: produce the initial session offer. Completes once the
    /// underlying negotiation data is ready; the invite cannot be sent
    /// before it resolves.
    async fn create_outbound_description(
        &self,
        local_media: &MediaHandle,
    ) -> Result<SignalingEnvelope, anyhow::Error>;

    /// Callee role: apply the caller's envelope and produce the answering
    /// envelope in one step.
    async fn create_inbound_description(
        &self,
        local_media: &MediaHandle,
        remote_envelope: &SignalingEnvelope,
    ) -> Result<SignalingEnvelope, anyhow::Error>;

    /// Caller role: finalize the handshake with the callee's answer.
    async fn apply_remote_description(
        &self,
        remote_envelope: &SignalingEnvelope,
    ) -> Result<(), anyhow::Error>;

    /// Releases all engine resources. Idempotent and safe from any state.
    async fn terminate(&self);
}

/// Creates one engine instance per call session.
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        role: CallRole,
    ) -> Result<(Arc<dyn PeerTransport>, mpsc::Receiver<PeerTransportEvent>), anyhow::Error>;
}
