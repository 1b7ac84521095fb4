//! Client configuration.

use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    /// Initial display name attached to outgoing invites. Purely cosmetic,
    /// never used for routing, and changeable any time before a call starts.
    pub display_name: String,
    /// How long an unanswered call may stay in Inviting/Ringing before it
    /// is ended with `EndReason::RingTimeout`.
    ///
    /// Defaults to `None`: the relay gives no delivery confirmation, so an
    /// invite that never reaches anyone leaves the caller ringing
    /// indefinitely. Set a duration to opt into automatic expiry instead.
    pub ring_timeout: Option<Duration>,
}
