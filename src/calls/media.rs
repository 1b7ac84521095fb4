//! Local media acquisition seam.
//!
//! Capture hardware is an external collaborator. The call machinery only
//! needs an opaque handle it can hand to the peer transport engine, so the
//! whole subsystem is a single trait with a fake in `test_utils`.

use async_trait::async_trait;
use thiserror::Error;

/// Opaque reference to a media source or sink owned by the capture/engine
/// layer. Cloning produces another reference to the same underlying media,
/// not a copy of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle(String);

impl MediaHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    /// Capture failed, typically missing hardware or denied permission.
    /// Surfaced directly to the user; a call cannot be placed without media.
    #[error("media capture unavailable: {0}")]
    Unavailable(String),
}

/// Provider of the local audio/video source.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, video: bool, audio: bool) -> Result<MediaHandle, MediaError>;
}
