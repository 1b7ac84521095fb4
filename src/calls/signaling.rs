//! Signaling wire protocol and outbound router.
//!
//! The relay speaks JSON frames tagged by an `event` field. Four events
//! exist: `identity-assigned` (relay push on connect), `call-invite` and
//! `call-accept` (client to relay, addressed by target identity), and the
//! relayed pushes `call-invite` / `call-accepted` delivered to the target.
//! Session descriptions travel inside these frames as opaque envelopes.
//!
//! Delivery is at-most-once with no acknowledgement, retry or
//! deduplication. A frame the relay cannot deliver simply disappears.

use super::error::CallError;
use crate::identity::SessionIdentity;
use crate::transport::Transport;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque session-description blob produced and consumed by the peer
/// transport engine.
///
/// The signaling layer transports it verbatim and never inspects or
/// mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalingEnvelope(String);

impl SignalingEnvelope {
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// An offer sent from caller to callee through the relay.
///
/// `caller_identity` may be empty when the relay never assigned this
/// client an identity; the invite then carries no return address and the
/// callee's accept has nowhere to go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInvite {
    pub target_identity: SessionIdentity,
    pub signaling_envelope: SignalingEnvelope,
    pub caller_identity: SessionIdentity,
    pub caller_display_name: String,
}

/// The answering description sent from callee back to caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAccept {
    pub target_identity: SessionIdentity,
    pub signaling_envelope: SignalingEnvelope,
}

/// Frames this client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    CallInvite(CallInvite),
    CallAccept(CallAccept),
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Frames the relay pushes to this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage {
    IdentityAssigned {
        identity: SessionIdentity,
    },
    /// A relayed invite. Same fields the caller sent, minus the routing
    /// target.
    #[serde(rename_all = "camelCase")]
    CallInvite {
        signaling_envelope: SignalingEnvelope,
        caller_identity: SessionIdentity,
        caller_display_name: String,
    },
    /// A relayed accept. Only the envelope survives the hop.
    #[serde(rename_all = "camelCase")]
    CallAccepted {
        signaling_envelope: SignalingEnvelope,
    },
}

impl ServerMessage {
    pub fn decode(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }
}

/// Outbound half of the signaling message router.
///
/// Encodes the two client message kinds and hands them to the relay
/// transport. The inbound half lives in `handler`.
pub struct SignalingRouter {
    transport: Arc<dyn Transport>,
}

impl SignalingRouter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn send_invite(&self, invite: CallInvite) -> Result<(), CallError> {
        debug!("--> call-invite to {}", invite.target_identity);
        let frame = ClientMessage::CallInvite(invite).encode()?;
        self.transport
            .send_frame(&frame)
            .await
            .map_err(CallError::signaling)
    }

    pub async fn send_accept(&self, accept: CallAccept) -> Result<(), CallError> {
        debug!("--> call-accept to {}", accept.target_identity);
        let frame = ClientMessage::CallAccept(accept).encode()?;
        self.transport
            .send_frame(&frame)
            .await
            .map_err(CallError::signaling)
    }
}
