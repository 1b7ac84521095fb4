//! Call state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::media::MediaHandle;
use super::peer::PeerTransport;
use super::signaling::SignalingEnvelope;
use crate::identity::SessionIdentity;

/// Which side of the call this client is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// The local user hung up.
    Hangup,
    /// The configured ring timeout expired before the call was answered.
    RingTimeout,
    /// Setting up the peer transport failed.
    SetupFailed,
    /// The relay connection died underneath the call.
    ConnectionLost,
}

/// Current state of a call.
///
/// `Idle` is only ever observed through `CallManager::call_state` when no
/// session exists; a constructed session starts in `Inviting` or `Ringing`.
#[derive(Debug, Clone, Serialize, Default)]
pub enum CallState {
    /// No call attempt exists.
    #[default]
    Idle,
    /// Outgoing call: invite being prepared or sent, waiting for an answer.
    Inviting { placed_at: DateTime<Utc> },
    /// Incoming call: ringing locally, waiting for the user to answer.
    Ringing { received_at: DateTime<Utc> },
    /// Descriptions exchanged, waiting for inbound media.
    Connecting { since: DateTime<Utc> },
    /// Call live with media flowing.
    Active { connected_at: DateTime<Utc> },
    /// Call ended. Terminal; a new call gets a fresh session.
    Ended {
        reason: EndReason,
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
}

impl CallState {
    pub fn is_inviting(&self) -> bool {
        matches!(self, Self::Inviting { .. })
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }

    pub fn can_answer(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }
}

/// State transitions for a call session.
#[derive(Debug, Clone)]
pub enum CallTransition {
    /// The remote peer accepted our invite (caller side).
    RemoteAccepted,
    /// The local user answered the ringing call (callee side).
    LocalAnswered,
    /// Inbound media is flowing. The only way into `Active`.
    MediaArrived,
    /// The call is over, for whatever reason.
    Terminated { reason: EndReason },
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// The full local state of one call attempt.
///
/// A session is an owned value: it is created when a call is placed or an
/// invite arrives, lives in the manager's single session slot, and is
/// replaced wholesale by the next call. The sequence number ties async
/// completions (descriptions, media events, timers) to the session they
/// were started for; anything arriving for a dead sequence is discarded.
#[derive(Serialize)]
pub struct CallSession {
    #[serde(skip)]
    pub seq: u64,
    pub role: CallRole,
    pub peer_identity: SessionIdentity,
    pub peer_display_name: String,
    pub state: CallState,
    /// Caller's envelope, held from invite until the user answers.
    /// Callee side only; the adapter does not exist yet at that point.
    #[serde(skip)]
    pub pending_envelope: Option<SignalingEnvelope>,
    #[serde(skip)]
    pub local_media: Option<MediaHandle>,
    #[serde(skip)]
    pub remote_media: Option<MediaHandle>,
    #[serde(skip)]
    pub(crate) adapter: Option<Arc<dyn PeerTransport>>,
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("seq", &self.seq)
            .field("role", &self.role)
            .field("peer_identity", &self.peer_identity)
            .field("peer_display_name", &self.peer_display_name)
            .field("state", &self.state)
            .field("pending_envelope", &self.pending_envelope.is_some())
            .field("local_media", &self.local_media)
            .field("remote_media", &self.remote_media)
            .field("adapter", &self.adapter.is_some())
            .finish()
    }
}

impl CallSession {
    pub fn new_outgoing(seq: u64, peer: SessionIdentity, local_media: MediaHandle) -> Self {
        Self {
            seq,
            role: CallRole::Caller,
            peer_identity: peer,
            peer_display_name: String::new(),
            state: CallState::Inviting {
                placed_at: Utc::now(),
            },
            pending_envelope: None,
            local_media: Some(local_media),
            remote_media: None,
            adapter: None,
        }
    }

    pub fn new_incoming(
        seq: u64,
        caller: SessionIdentity,
        caller_name: String,
        envelope: SignalingEnvelope,
    ) -> Self {
        Self {
            seq,
            role: CallRole::Callee,
            peer_identity: caller,
            peer_display_name: caller_name,
            state: CallState::Ringing {
                received_at: Utc::now(),
            },
            pending_envelope: Some(envelope),
            local_media: None,
            remote_media: None,
            adapter: None,
        }
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<(), InvalidTransition> {
        let new_state = match (&self.state, transition) {
            (CallState::Inviting { .. }, CallTransition::RemoteAccepted) => CallState::Connecting {
                since: Utc::now(),
            },
            (CallState::Ringing { .. }, CallTransition::LocalAnswered) => CallState::Connecting {
                since: Utc::now(),
            },
            (CallState::Connecting { .. }, CallTransition::MediaArrived) => CallState::Active {
                connected_at: Utc::now(),
            },
            (CallState::Active { connected_at }, CallTransition::Terminated { reason }) => {
                let duration = Utc::now()
                    .signed_duration_since(*connected_at)
                    .num_seconds();
                CallState::Ended {
                    reason,
                    ended_at: Utc::now(),
                    duration_secs: Some(duration),
                }
            }
            (
                CallState::Inviting { .. } | CallState::Ringing { .. } | CallState::Connecting { .. },
                CallTransition::Terminated { reason },
            ) => CallState::Ended {
                reason,
                ended_at: Utc::now(),
                duration_secs: None,
            },
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.state = new_state;
        Ok(())
    }
}
