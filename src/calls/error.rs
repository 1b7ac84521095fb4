//! Call-related error types.

use thiserror::Error;

use super::media::MediaError;
use super::state::InvalidTransition;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("no incoming call to answer")]
    NoPendingCall,

    #[error("a call is already in progress")]
    CallInProgress,

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("peer transport error: {0}")]
    Peer(anyhow::Error),

    #[error("signaling send failed: {0}")]
    Signaling(anyhow::Error),

    #[error("signaling encode error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("not connected to the relay")]
    NotConnected,
}

impl CallError {
    pub(crate) fn peer(err: anyhow::Error) -> Self {
        Self::Peer(err)
    }

    pub(crate) fn signaling(err: anyhow::Error) -> Self {
        Self::Signaling(err)
    }
}
