//! Call manager: orchestrates the lifecycle of the single call session.
//!
//! All state transitions happen under one write guard on the session slot.
//! The suspension points (description generation, signaling sends, media
//! arrival) are awaited outside the lock and re-validated against the
//! session sequence afterwards, so an end-call issued during any pending
//! wait deterministically lands the machine in `Ended` and releases every
//! resource exactly once.

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};

use super::error::CallError;
use super::media::MediaHandle;
use super::peer::{PeerTransportEvent, PeerTransportFactory};
use super::signaling::{CallAccept, CallInvite, SignalingEnvelope, SignalingRouter};
use super::state::{
    CallRole, CallSession, CallState, CallTransition, EndReason, InvalidTransition,
};
use crate::config::ClientConfig;
use crate::events::{CallAccepted, CallActive, CallEnded, Event, EventBus, IncomingCall};
use crate::identity::{IdentityManager, SessionIdentity};

/// Owns the current call session and drives it through the state machine.
pub struct CallManager {
    config: ClientConfig,
    router: SignalingRouter,
    peer_factory: Arc<dyn PeerTransportFactory>,
    identity: Arc<IdentityManager>,
    events: EventBus,
    display_name: RwLock<String>,
    /// The locally captured media source, acquired once and shared by
    /// every call this client makes. Sessions hold their own reference.
    acquired_media: RwLock<Option<MediaHandle>>,
    /// The single session slot. `None` (or an `Ended` tombstone) means
    /// Idle; a fresh `CallSession` value replaces it for every call.
    session: RwLock<Option<CallSession>>,
    session_seq: AtomicU64,
}

impl CallManager {
    pub fn new(
        config: ClientConfig,
        router: SignalingRouter,
        peer_factory: Arc<dyn PeerTransportFactory>,
        identity: Arc<IdentityManager>,
        events: EventBus,
    ) -> Arc<Self> {
        let display_name = config.display_name.clone();
        Arc::new(Self {
            config,
            router,
            peer_factory,
            identity,
            events,
            display_name: RwLock::new(display_name),
            acquired_media: RwLock::new(None),
            session: RwLock::new(None),
            session_seq: AtomicU64::new(0),
        })
    }

    fn next_seq(&self) -> u64 {
        self.session_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    // --- local user actions ---

    /// Start an outgoing call to the given relay identity.
    ///
    /// Requires local media to have been acquired; without it there is no
    /// handle to attach and the action silently does nothing, matching the
    /// reference behavior.
    pub async fn place_call(self: &Arc<Self>, target: SessionIdentity) -> Result<(), CallError> {
        let Some(local_media) = self.acquired_media.read().await.clone() else {
            warn!("no local media acquired; ignoring call attempt to {}", target);
            return Ok(());
        };

        let seq = {
            let mut slot = self.session.write().await;
            if let Some(existing) = slot.as_ref()
                && !existing.state.is_ended()
            {
                return Err(CallError::CallInProgress);
            }
            let seq = self.next_seq();
            *slot = Some(CallSession::new_outgoing(
                seq,
                target.clone(),
                local_media.clone(),
            ));
            seq
        };
        self.spawn_ring_timer(seq);

        let (adapter, peer_events) = match self.peer_factory.create(CallRole::Caller).await {
            Ok(pair) => pair,
            Err(e) => {
                self.terminate_current(Some(seq), false, EndReason::SetupFailed)
                    .await;
                return Err(CallError::peer(e));
            }
        };
        self.spawn_peer_pump(seq, peer_events);

        // Attach before the description wait so that an end-call issued
        // meanwhile tears the adapter down.
        let attached = {
            let mut slot = self.session.write().await;
            match slot.as_mut() {
                Some(s) if s.seq == seq && s.state.is_inviting() => {
                    s.adapter = Some(adapter.clone());
                    true
                }
                _ => false,
            }
        };
        if !attached {
            adapter.terminate().await;
            return Ok(());
        }

        let envelope = match adapter.create_outbound_description(&local_media).await {
            Ok(envelope) => envelope,
            Err(e) => {
                self.terminate_current(Some(seq), false, EndReason::SetupFailed)
                    .await;
                return Err(CallError::peer(e));
            }
        };

        // The call may have been ended while the engine was working.
        {
            let slot = self.session.read().await;
            match slot.as_ref() {
                Some(s) if s.seq == seq && s.state.is_inviting() => {}
                _ => {
                    debug!("call ended before the invite could be sent");
                    return Ok(());
                }
            }
        }

        let caller_identity = self.identity.current().unwrap_or_default();
        if caller_identity.is_empty() {
            // The invite still goes out; the callee's accept will have no
            // return address to reach us at.
            warn!(
                "no session identity assigned; invite to {} carries an empty return address",
                target
            );
        }
        let caller_display_name = self.display_name.read().await.clone();

        self.router
            .send_invite(CallInvite {
                target_identity: target,
                signaling_envelope: envelope,
                caller_identity,
                caller_display_name,
            })
            .await
    }

    /// Answer the currently ringing incoming call.
    ///
    /// Creates the peer transport in callee role from the stored invite
    /// envelope, sends the answering description back to the caller and
    /// moves the session to Connecting.
    pub async fn answer(self: &Arc<Self>) -> Result<(), CallError> {
        let Some(local_media) = self.acquired_media.read().await.clone() else {
            warn!("no local media acquired; ignoring answer");
            return Ok(());
        };

        let (seq, caller, pending) = {
            let mut slot = self.session.write().await;
            let Some(s) = slot.as_mut() else {
                return Err(CallError::NoPendingCall);
            };
            if !s.state.can_answer() {
                return Err(CallError::InvalidTransition(InvalidTransition {
                    current_state: format!("{:?}", s.state),
                    attempted: "LocalAnswered".to_string(),
                }));
            }
            let pending = s.pending_envelope.take().ok_or(CallError::NoPendingCall)?;
            (s.seq, s.peer_identity.clone(), pending)
        };

        let (adapter, peer_events) = match self.peer_factory.create(CallRole::Callee).await {
            Ok(pair) => pair,
            Err(e) => {
                self.terminate_current(Some(seq), false, EndReason::SetupFailed)
                    .await;
                return Err(CallError::peer(e));
            }
        };
        self.spawn_peer_pump(seq, peer_events);

        let envelope = match adapter
            .create_inbound_description(&local_media, &pending)
            .await
        {
            Ok(envelope) => envelope,
            Err(e) => {
                adapter.terminate().await;
                self.terminate_current(Some(seq), false, EndReason::SetupFailed)
                    .await;
                return Err(CallError::peer(e));
            }
        };

        if let Err(e) = self
            .router
            .send_accept(CallAccept {
                target_identity: caller.clone(),
                signaling_envelope: envelope,
            })
            .await
        {
            adapter.terminate().await;
            self.terminate_current(Some(seq), false, EndReason::SetupFailed)
                .await;
            return Err(e);
        }

        let answered = {
            let mut slot = self.session.write().await;
            match slot.as_mut() {
                Some(s) if s.seq == seq && s.state.can_answer() => {
                    s.apply_transition(CallTransition::LocalAnswered)?;
                    s.adapter = Some(adapter.clone());
                    s.local_media = Some(local_media);
                    true
                }
                _ => false,
            }
        };
        if !answered {
            adapter.terminate().await;
            debug!("call ended while answering");
            return Ok(());
        }

        // Media may have beaten the handshake; surface Active right away.
        self.activate_if_media_ready(seq).await;
        Ok(())
    }

    /// End the current call, whatever state it is in. Safe to call at any
    /// time, including repeatedly and during pending setup work; only the
    /// first invocation tears anything down.
    pub async fn end_call(&self) {
        self.terminate_current(None, false, EndReason::Hangup).await;
    }

    // --- remote signaling events ---

    /// An invite pushed to us by the relay: become the ringing callee.
    ///
    /// No adapter is created yet; the caller's envelope is parked on the
    /// session until the user answers. If a session is already live the
    /// second invite is rejected and dropped (documented policy; see
    /// DESIGN.md).
    pub(crate) async fn handle_remote_invite(
        self: &Arc<Self>,
        caller: SessionIdentity,
        caller_name: String,
        envelope: SignalingEnvelope,
    ) {
        let seq = {
            let mut slot = self.session.write().await;
            if let Some(existing) = slot.as_ref()
                && !existing.state.is_ended()
            {
                warn!(
                    "invite from {} while a call is in progress; rejecting it",
                    caller
                );
                return;
            }
            let seq = self.next_seq();
            *slot = Some(CallSession::new_incoming(
                seq,
                caller.clone(),
                caller_name.clone(),
                envelope,
            ));
            seq
        };
        self.spawn_ring_timer(seq);

        info!("incoming call from {}", caller);
        self.events
            .dispatch(&Event::IncomingCall(IncomingCall { caller, caller_name }));
    }

    /// The callee accepted: apply their answer and wait for media.
    pub(crate) async fn handle_remote_accept(&self, envelope: SignalingEnvelope) {
        let (seq, peer, adapter) = {
            let mut slot = self.session.write().await;
            let Some(s) = slot.as_mut() else {
                debug!("call-accepted received with no call in progress");
                return;
            };
            if !s.state.is_inviting() {
                debug!("stray call-accepted in state {:?}", s.state);
                return;
            }
            if let Err(e) = s.apply_transition(CallTransition::RemoteAccepted) {
                warn!("cannot apply remote accept: {}", e);
                return;
            }
            (s.seq, s.peer_identity.clone(), s.adapter.clone())
        };

        self.events
            .dispatch(&Event::CallAccepted(CallAccepted { peer }));

        let Some(adapter) = adapter else {
            // Unreachable with a per-pair FIFO bus: an accept can only
            // follow an invite, and the invite is only sent once the
            // adapter exists.
            warn!("call-accepted before the peer transport was ready; dropping");
            return;
        };

        if let Err(e) = adapter.apply_remote_description(&envelope).await {
            warn!("applying remote description failed: {}", e);
            self.terminate_current(Some(seq), false, EndReason::SetupFailed)
                .await;
            return;
        }

        self.activate_if_media_ready(seq).await;
    }

    /// The relay connection died; the call cannot outlive its bus.
    pub(crate) async fn handle_bus_disconnected(&self) {
        self.terminate_current(None, false, EndReason::ConnectionLost)
            .await;
    }

    // --- engine events ---

    async fn handle_remote_media(&self, seq: u64, handle: MediaHandle) {
        {
            let mut slot = self.session.write().await;
            match slot.as_mut() {
                Some(s) if s.seq == seq && !s.state.is_ended() => {
                    debug!("remote media arrived for call with {}", s.peer_identity);
                    s.remote_media = Some(handle);
                }
                _ => {
                    debug!("remote media for a dead call; ignoring");
                    return;
                }
            }
        }
        self.activate_if_media_ready(seq).await;
    }

    /// Inbound media is the sole trigger into Active, and only once the
    /// session has reached Connecting. Media that arrives earlier is
    /// parked on the session until then.
    async fn activate_if_media_ready(&self, seq: u64) {
        let peer = {
            let mut slot = self.session.write().await;
            match slot.as_mut() {
                Some(s)
                    if s.seq == seq && s.state.is_connecting() && s.remote_media.is_some() =>
                {
                    if s.apply_transition(CallTransition::MediaArrived).is_err() {
                        return;
                    }
                    s.peer_identity.clone()
                }
                _ => return,
            }
        };
        info!("call with {} is active", peer);
        self.events.dispatch(&Event::CallActive(CallActive { peer }));
    }

    // --- teardown ---

    /// Move the session to Ended and release its resources exactly once.
    ///
    /// `want_seq` restricts the teardown to a specific session;
    /// `setup_only` additionally restricts it to Inviting/Ringing (used by
    /// the ring timer so it cannot kill a call that got answered).
    async fn terminate_current(
        &self,
        want_seq: Option<u64>,
        setup_only: bool,
        reason: EndReason,
    ) {
        let (adapter, peer) = {
            let mut slot = self.session.write().await;
            let Some(s) = slot.as_mut() else {
                return;
            };
            if s.state.is_ended() {
                return;
            }
            if let Some(seq) = want_seq
                && s.seq != seq
            {
                return;
            }
            if setup_only && !s.state.is_inviting() && !s.state.is_ringing() {
                return;
            }
            if let Err(e) = s.apply_transition(CallTransition::Terminated { reason }) {
                warn!("cannot terminate call: {}", e);
                return;
            }
            s.pending_envelope = None;
            s.local_media = None;
            s.remote_media = None;
            (s.adapter.take(), s.peer_identity.clone())
        };

        // No message goes to the peer: its own transport detects the loss.
        if let Some(adapter) = adapter {
            adapter.terminate().await;
        }
        info!("call with {} ended: {:?}", peer, reason);
        self.events
            .dispatch(&Event::CallEnded(CallEnded { peer, reason }));
    }

    // --- background tasks ---

    fn spawn_peer_pump(
        self: &Arc<Self>,
        seq: u64,
        mut events: mpsc::Receiver<PeerTransportEvent>,
    ) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PeerTransportEvent::RemoteMediaArrived(handle) => {
                        manager.handle_remote_media(seq, handle).await;
                    }
                }
            }
        });
    }

    fn spawn_ring_timer(self: &Arc<Self>, seq: u64) {
        let Some(timeout) = self.config.ring_timeout else {
            return;
        };
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager
                .terminate_current(Some(seq), true, EndReason::RingTimeout)
                .await;
        });
    }

    // --- observables and knobs ---

    pub async fn set_local_media(&self, handle: MediaHandle) {
        *self.acquired_media.write().await = Some(handle);
    }

    pub async fn set_display_name(&self, name: String) {
        *self.display_name.write().await = name;
    }

    pub async fn display_name(&self) -> String {
        self.display_name.read().await.clone()
    }

    pub async fn call_state(&self) -> CallState {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.state.clone())
            .unwrap_or_default()
    }

    pub async fn peer_identity(&self) -> Option<SessionIdentity> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.peer_identity.clone())
    }

    pub async fn peer_display_name(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.peer_display_name.clone())
    }

    pub async fn local_media(&self) -> Option<MediaHandle> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.local_media.clone())
    }

    pub async fn remote_media(&self) -> Option<MediaHandle> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.remote_media.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::signaling::ClientMessage;
    use crate::test_utils::FakePeerFactory;
    use crate::transport::mock::MockTransport;
    use std::time::Duration;

    fn make_manager(
        config: ClientConfig,
        transport: Arc<MockTransport>,
        factory: Arc<FakePeerFactory>,
    ) -> (Arc<CallManager>, Arc<IdentityManager>) {
        let identity = Arc::new(IdentityManager::new());
        let manager = CallManager::new(
            config,
            SignalingRouter::new(transport),
            factory,
            identity.clone(),
            EventBus::new(),
        );
        (manager, identity)
    }

    #[tokio::test]
    async fn test_place_call_without_media_is_a_silent_noop() {
        let transport = Arc::new(MockTransport::new());
        let (manager, _) = make_manager(
            ClientConfig::default(),
            transport.clone(),
            Arc::new(FakePeerFactory::manual()),
        );

        manager
            .place_call(SessionIdentity::new("xyz"))
            .await
            .unwrap();

        assert!(matches!(manager.call_state().await, CallState::Idle));
        assert!(transport.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn test_place_call_sends_invite_with_name_and_identity() {
        let transport = Arc::new(MockTransport::new());
        let (manager, identity) = make_manager(
            ClientConfig::default(),
            transport.clone(),
            Arc::new(FakePeerFactory::manual()),
        );
        identity.assign(SessionIdentity::new("abc"));
        manager.set_display_name("Alice".to_string()).await;
        manager
            .set_local_media(MediaHandle::new("camera-0"))
            .await;

        manager
            .place_call(SessionIdentity::new("xyz"))
            .await
            .unwrap();

        assert!(manager.call_state().await.is_inviting());

        let frames = transport.sent_frames();
        assert_eq!(frames.len(), 1);
        let ClientMessage::CallInvite(invite) = serde_json::from_slice(&frames[0]).unwrap() else {
            panic!("expected call-invite frame");
        };
        assert_eq!(invite.target_identity, SessionIdentity::new("xyz"));
        assert_eq!(invite.caller_identity, SessionIdentity::new("abc"));
        assert_eq!(invite.caller_display_name, "Alice");
    }

    /// An unassigned identity does not block the invite; it just carries
    /// an empty return address.
    #[tokio::test]
    async fn test_invite_without_identity_has_empty_return_address() {
        let transport = Arc::new(MockTransport::new());
        let (manager, _) = make_manager(
            ClientConfig::default(),
            transport.clone(),
            Arc::new(FakePeerFactory::manual()),
        );
        manager
            .set_local_media(MediaHandle::new("camera-0"))
            .await;

        manager
            .place_call(SessionIdentity::new("xyz"))
            .await
            .unwrap();

        let frames = transport.sent_frames();
        let ClientMessage::CallInvite(invite) = serde_json::from_slice(&frames[0]).unwrap() else {
            panic!("expected call-invite frame");
        };
        assert!(invite.caller_identity.is_empty());
    }

    #[tokio::test]
    async fn test_second_invite_is_rejected_while_ringing() {
        let transport = Arc::new(MockTransport::new());
        let (manager, _) = make_manager(
            ClientConfig::default(),
            transport,
            Arc::new(FakePeerFactory::manual()),
        );

        manager
            .handle_remote_invite(
                SessionIdentity::new("abc"),
                "Alice".to_string(),
                SignalingEnvelope::new("offer-1"),
            )
            .await;
        manager
            .handle_remote_invite(
                SessionIdentity::new("mallory"),
                String::new(),
                SignalingEnvelope::new("offer-2"),
            )
            .await;

        assert_eq!(
            manager.peer_identity().await,
            Some(SessionIdentity::new("abc"))
        );
        assert!(manager.call_state().await.is_ringing());
    }

    #[tokio::test]
    async fn test_end_call_is_idempotent_and_releases_once() {
        let transport = Arc::new(MockTransport::new());
        let factory = Arc::new(FakePeerFactory::manual());
        let (manager, _) = make_manager(ClientConfig::default(), transport, factory.clone());
        manager
            .set_local_media(MediaHandle::new("camera-0"))
            .await;

        manager
            .place_call(SessionIdentity::new("xyz"))
            .await
            .unwrap();
        assert!(manager.call_state().await.is_inviting());

        manager.end_call().await;
        manager.end_call().await;

        assert!(manager.call_state().await.is_ended());
        assert!(manager.local_media().await.is_none());
        let adapters = factory.created();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].terminate_count(), 1);
    }

    #[tokio::test]
    async fn test_answer_without_call_errors() {
        let transport = Arc::new(MockTransport::new());
        let (manager, _) = make_manager(
            ClientConfig::default(),
            transport,
            Arc::new(FakePeerFactory::manual()),
        );
        manager
            .set_local_media(MediaHandle::new("camera-0"))
            .await;

        assert!(matches!(
            manager.answer().await,
            Err(CallError::NoPendingCall)
        ));
    }

    #[tokio::test]
    async fn test_ring_timeout_expires_unanswered_invite() {
        let transport = Arc::new(MockTransport::new());
        let config = ClientConfig {
            ring_timeout: Some(Duration::from_millis(30)),
            ..Default::default()
        };
        let (manager, _) = make_manager(config, transport, Arc::new(FakePeerFactory::manual()));
        manager
            .set_local_media(MediaHandle::new("camera-0"))
            .await;

        manager
            .place_call(SessionIdentity::new("nobody"))
            .await
            .unwrap();
        assert!(manager.call_state().await.is_inviting());

        tokio::time::sleep(Duration::from_millis(80)).await;

        match manager.call_state().await {
            CallState::Ended { reason, .. } => assert_eq!(reason, EndReason::RingTimeout),
            other => panic!("expected Ended, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stray_accept_is_ignored() {
        let transport = Arc::new(MockTransport::new());
        let (manager, _) = make_manager(
            ClientConfig::default(),
            transport,
            Arc::new(FakePeerFactory::manual()),
        );

        manager
            .handle_remote_accept(SignalingEnvelope::new("answer"))
            .await;
        assert!(matches!(manager.call_state().await, CallState::Idle));
    }
}
