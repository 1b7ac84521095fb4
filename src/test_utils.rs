//! Shared fakes for unit and integration tests: an in-memory relay bus, a
//! fake capture source and a fake peer transport engine.

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use crate::calls::media::{MediaError, MediaHandle, MediaSource};
use crate::calls::peer::{PeerTransport, PeerTransportEvent, PeerTransportFactory};
use crate::calls::signaling::{ClientMessage, ServerMessage, SignalingEnvelope};
use crate::calls::state::CallRole;
use crate::identity::SessionIdentity;
use crate::transport::{Transport, TransportEvent, TransportFactory};

const PEER_CHANNEL_CAPACITY: usize = 64;

/// An in-memory stand-in for the relay bus.
///
/// Mirrors the external relay's observable contract: every connection gets
/// a transient identity pushed as `identity-assigned` (deterministically
/// `peer-1`, `peer-2`, ...), invites are forwarded verbatim minus the
/// routing target, accepts are forwarded as `call-accepted` carrying only
/// the envelope, and frames addressed to an identity nobody holds vanish
/// without a trace.
#[derive(Clone)]
pub struct InMemoryRelay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    peers: Mutex<HashMap<SessionIdentity, mpsc::Sender<TransportEvent>>>,
    next_peer: AtomicU64,
    assign_identities: bool,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RelayInner {
                peers: Mutex::new(HashMap::new()),
                next_peer: AtomicU64::new(0),
                assign_identities: true,
            }),
        }
    }

    /// A relay that registers clients but never tells them who they are,
    /// for exercising the empty-return-address degradation.
    pub fn without_identity_assignment() -> Self {
        Self {
            inner: Arc::new(RelayInner {
                peers: Mutex::new(HashMap::new()),
                next_peer: AtomicU64::new(0),
                assign_identities: false,
            }),
        }
    }
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayInner {
    async fn route(&self, frame: &[u8]) {
        match serde_json::from_slice::<ClientMessage>(frame) {
            Ok(ClientMessage::CallInvite(invite)) => {
                let target = invite.target_identity;
                self.deliver(
                    &target,
                    ServerMessage::CallInvite {
                        signaling_envelope: invite.signaling_envelope,
                        caller_identity: invite.caller_identity,
                        caller_display_name: invite.caller_display_name,
                    },
                )
                .await;
            }
            Ok(ClientMessage::CallAccept(accept)) => {
                let target = accept.target_identity;
                self.deliver(
                    &target,
                    ServerMessage::CallAccepted {
                        signaling_envelope: accept.signaling_envelope,
                    },
                )
                .await;
            }
            Err(e) => debug!("relay: unroutable frame: {}", e),
        }
    }

    async fn deliver(&self, target: &SessionIdentity, push: ServerMessage) {
        let tx = self.peers.lock().await.get(target).cloned();
        let Some(tx) = tx else {
            // No delivery confirmation exists; the frame just disappears.
            debug!("relay: nobody holds identity {}; dropping frame", target);
            return;
        };
        let frame = serde_json::to_vec(&push).expect("server message should serialize");
        let _ = tx.send(TransportEvent::FrameReceived(Bytes::from(frame))).await;
    }
}

struct InMemoryTransport {
    relay: Arc<RelayInner>,
    me: SessionIdentity,
    events_tx: mpsc::Sender<TransportEvent>,
    connected: AtomicBool,
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Socket is closed"));
        }
        self.relay.route(frame).await;
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.relay.peers.lock().await.remove(&self.me);
            let _ = self.events_tx.send(TransportEvent::Disconnected).await;
        }
    }
}

#[async_trait]
impl TransportFactory for InMemoryRelay {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let n = self.inner.next_peer.fetch_add(1, Ordering::SeqCst) + 1;
        let me = SessionIdentity::new(format!("peer-{}", n));

        let (events_tx, events_rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
        self.inner
            .peers
            .lock()
            .await
            .insert(me.clone(), events_tx.clone());

        let _ = events_tx.send(TransportEvent::Connected).await;
        if self.inner.assign_identities {
            let frame = serde_json::to_vec(&ServerMessage::IdentityAssigned {
                identity: me.clone(),
            })
            .expect("server message should serialize");
            let _ = events_tx
                .send(TransportEvent::FrameReceived(Bytes::from(frame)))
                .await;
        }

        let transport = Arc::new(InMemoryTransport {
            relay: self.inner.clone(),
            me,
            events_tx,
            connected: AtomicBool::new(true),
        });
        Ok((transport, events_rx))
    }
}

/// Fake capture source handing out numbered handles, or failing on demand.
pub struct FakeMediaSource {
    fail: bool,
    counter: AtomicU64,
}

impl FakeMediaSource {
    pub fn new() -> Self {
        Self {
            fail: false,
            counter: AtomicU64::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for FakeMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self, _video: bool, _audio: bool) -> Result<MediaHandle, MediaError> {
        if self.fail {
            return Err(MediaError::Unavailable(
                "camera permission denied".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MediaHandle::new(format!("camera-{}", n)))
    }
}

/// Fake peer transport engine.
///
/// In auto-media mode it emits `RemoteMediaArrived` as soon as a remote
/// description has been applied on its side, approximating an engine whose
/// media starts flowing once negotiation data is in. Manual mode leaves
/// media emission to the test.
pub struct FakePeerTransport {
    role: CallRole,
    auto_media: bool,
    media_tx: mpsc::Sender<PeerTransportEvent>,
    applied_remote: StdMutex<Option<SignalingEnvelope>>,
    terminated: AtomicBool,
    terminate_calls: AtomicUsize,
}

impl FakePeerTransport {
    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn terminate_count(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn applied_remote(&self) -> Option<SignalingEnvelope> {
        self.applied_remote.lock().unwrap().clone()
    }

    pub async fn emit_remote_media(&self, handle: MediaHandle) {
        let _ = self
            .media_tx
            .send(PeerTransportEvent::RemoteMediaArrived(handle))
            .await;
    }
}

#[async_trait]
impl PeerTransport for FakePeerTransport {
    async fn create_outbound_description(
        &self,
        local_media: &MediaHandle,
    ) -> Result<SignalingEnvelope, anyhow::Error> {
        Ok(SignalingEnvelope::new(format!("offer:{}", local_media.id())))
    }

    async fn create_inbound_description(
        &self,
        local_media: &MediaHandle,
        remote_envelope: &SignalingEnvelope,
    ) -> Result<SignalingEnvelope, anyhow::Error> {
        *self.applied_remote.lock().unwrap() = Some(remote_envelope.clone());
        if self.auto_media {
            self.emit_remote_media(MediaHandle::new(format!(
                "remote-media-of:{}",
                local_media.id()
            )))
            .await;
        }
        Ok(SignalingEnvelope::new(format!(
            "answer:{}",
            remote_envelope.as_str()
        )))
    }

    async fn apply_remote_description(
        &self,
        remote_envelope: &SignalingEnvelope,
    ) -> Result<(), anyhow::Error> {
        *self.applied_remote.lock().unwrap() = Some(remote_envelope.clone());
        if self.auto_media {
            self.emit_remote_media(MediaHandle::new("remote-media")).await;
        }
        Ok(())
    }

    async fn terminate(&self) {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Factory producing [`FakePeerTransport`] instances and remembering them
/// so tests can inspect termination and applied descriptions.
pub struct FakePeerFactory {
    auto_media: bool,
    created: StdMutex<Vec<Arc<FakePeerTransport>>>,
}

impl FakePeerFactory {
    /// Engine that emits remote media on its own once descriptions land.
    pub fn new() -> Self {
        Self {
            auto_media: true,
            created: StdMutex::new(Vec::new()),
        }
    }

    /// Engine that never emits media until the test says so.
    pub fn manual() -> Self {
        Self {
            auto_media: false,
            created: StdMutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<Arc<FakePeerTransport>> {
        self.created.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Option<Arc<FakePeerTransport>> {
        self.created.lock().unwrap().last().cloned()
    }
}

impl Default for FakePeerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransportFactory for FakePeerFactory {
    async fn create(
        &self,
        role: CallRole,
    ) -> Result<(Arc<dyn PeerTransport>, mpsc::Receiver<PeerTransportEvent>), anyhow::Error> {
        let (media_tx, media_rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
        let fake = Arc::new(FakePeerTransport {
            role,
            auto_media: self.auto_media,
            media_tx,
            applied_remote: StdMutex::new(None),
            terminated: AtomicBool::new(false),
            terminate_calls: AtomicUsize::new(0),
        });
        self.created.lock().unwrap().push(fake.clone());
        Ok((fake, media_rx))
    }
}
