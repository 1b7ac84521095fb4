//! Top-level error type for the client API.

use thiserror::Error;

use crate::calls::error::CallError;
use crate::calls::media::MediaError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("call error: {0}")]
    Call(#[from] CallError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("transport error: {0}")]
    Transport(anyhow::Error),

    #[error("not connected to the relay")]
    NotConnected,
}
