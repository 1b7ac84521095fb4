//! Inbound signaling dispatch.

use log::{debug, warn};
use std::sync::Arc;

use super::manager::CallManager;
use super::signaling::ServerMessage;
use crate::events::{Event, EventBus, IdentityAssigned};
use crate::identity::IdentityManager;

/// Inbound half of the signaling message router: decodes relay frames and
/// routes them to the identity manager and call manager.
pub(crate) struct InboundHandler {
    identity: Arc<IdentityManager>,
    calls: Arc<CallManager>,
    events: EventBus,
}

impl InboundHandler {
    pub(crate) fn new(
        identity: Arc<IdentityManager>,
        calls: Arc<CallManager>,
        events: EventBus,
    ) -> Self {
        Self {
            identity,
            calls,
            events,
        }
    }

    pub(crate) async fn handle_frame(&self, frame: &[u8]) {
        let message = match ServerMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("failed to parse signaling frame: {}", e);
                return;
            }
        };

        match message {
            ServerMessage::IdentityAssigned { identity } => {
                debug!("<-- identity-assigned: {}", identity);
                self.identity.assign(identity.clone());
                self.events
                    .dispatch(&Event::IdentityAssigned(IdentityAssigned { identity }));
            }
            ServerMessage::CallInvite {
                signaling_envelope,
                caller_identity,
                caller_display_name,
            } => {
                debug!("<-- call-invite from {}", caller_identity);
                self.calls
                    .handle_remote_invite(caller_identity, caller_display_name, signaling_envelope)
                    .await;
            }
            ServerMessage::CallAccepted { signaling_envelope } => {
                debug!("<-- call-accepted");
                self.calls.handle_remote_accept(signaling_envelope).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::signaling::SignalingRouter;
    use crate::config::ClientConfig;
    use crate::test_utils::FakePeerFactory;
    use crate::transport::mock::MockTransport;

    fn make_handler() -> InboundHandler {
        let identity = Arc::new(IdentityManager::new());
        let events = EventBus::new();
        let calls = CallManager::new(
            ClientConfig::default(),
            SignalingRouter::new(Arc::new(MockTransport::new())),
            Arc::new(FakePeerFactory::manual()),
            identity.clone(),
            events.clone(),
        );
        InboundHandler::new(identity, calls, events)
    }

    #[tokio::test]
    async fn test_garbage_frames_are_dropped() {
        let handler = make_handler();
        handler.handle_frame(b"not json at all").await;
        handler.handle_frame(br#"{"event":"unknown-kind"}"#).await;
        assert_eq!(handler.identity.current(), None);
    }

    #[tokio::test]
    async fn test_identity_assignment_is_routed() {
        let handler = make_handler();
        handler
            .handle_frame(br#"{"event":"identity-assigned","identity":"abc"}"#)
            .await;
        assert_eq!(
            handler.identity.current().map(|i| i.as_str().to_string()),
            Some("abc".to_string())
        );
    }

    #[tokio::test]
    async fn test_relayed_invite_starts_ringing() {
        let handler = make_handler();
        handler
            .handle_frame(
                br#"{"event":"call-invite","signalingEnvelope":"blob","callerIdentity":"abc","callerDisplayName":"Alice"}"#,
            )
            .await;
        assert!(handler.calls.call_state().await.is_ringing());
        assert_eq!(
            handler.calls.peer_display_name().await,
            Some("Alice".to_string())
        );
    }
}
