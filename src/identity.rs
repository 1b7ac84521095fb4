//! Transient session identity assigned by the relay.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::RwLock;

/// The opaque address the relay assigns to a connected client.
///
/// Identities are transient: they live exactly as long as the relay
/// connection and every signaling message is routed by them. The value
/// itself carries no meaning for this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionIdentity {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Tracks the identity the relay assigned to this connection.
///
/// The relay pushes the assignment exactly once, right after connect.
/// There are no retries: a client that never receives an assignment can
/// still take incoming calls, but its outgoing invites carry an empty
/// return address (see `CallManager::place_call`).
#[derive(Debug, Default)]
pub struct IdentityManager {
    current: RwLock<Option<SessionIdentity>>,
}

impl IdentityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The identity assigned by the relay, if any.
    pub fn current(&self) -> Option<SessionIdentity> {
        self.current
            .read()
            .expect("RwLock should not be poisoned")
            .clone()
    }

    pub(crate) fn assign(&self, identity: SessionIdentity) {
        let mut current = self
            .current
            .write()
            .expect("RwLock should not be poisoned");
        if let Some(existing) = current.as_ref()
            && existing != &identity
        {
            warn!("relay replaced session identity {} with {}", existing, identity);
        }
        info!("session identity assigned: {}", identity);
        *current = Some(identity);
    }

    /// Invalidates the identity. Called when the relay connection dies;
    /// identities never outlive their connection.
    pub(crate) fn clear(&self) {
        *self
            .current
            .write()
            .expect("RwLock should not be poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_starts_unset() {
        let manager = IdentityManager::new();
        assert_eq!(manager.current(), None);
    }

    #[test]
    fn test_assign_and_clear() {
        let manager = IdentityManager::new();
        manager.assign(SessionIdentity::new("abc"));
        assert_eq!(manager.current(), Some(SessionIdentity::new("abc")));

        manager.clear();
        assert_eq!(manager.current(), None);
    }

    #[test]
    fn test_reassignment_keeps_latest() {
        let manager = IdentityManager::new();
        manager.assign(SessionIdentity::new("abc"));
        manager.assign(SessionIdentity::new("xyz"));
        assert_eq!(manager.current(), Some(SessionIdentity::new("xyz")));
    }
}
