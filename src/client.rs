//! The relay client: connection plumbing around the call machinery.

use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::calls::handler::InboundHandler;
use crate::calls::manager::CallManager;
use crate::calls::media::{MediaHandle, MediaSource};
use crate::calls::peer::PeerTransportFactory;
use crate::calls::signaling::SignalingRouter;
use crate::calls::state::CallState;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::events::{Event, EventBus, EventHandler};
use crate::identity::{IdentityManager, SessionIdentity};
use crate::transport::{Transport, TransportEvent, TransportFactory};

/// A connected client of the relay bus.
///
/// Construction dials the relay and spawns the read pump; from then on the
/// relay can push an identity assignment and call signaling at any time.
/// The client exposes the five user-facing entry points (set display name,
/// read own identity, place call, answer, end call) plus media acquisition
/// and the read-only call observables.
pub struct RelayClient {
    identity: Arc<IdentityManager>,
    calls: Arc<CallManager>,
    media_source: Arc<dyn MediaSource>,
    transport: Arc<dyn Transport>,
    handler: InboundHandler,
    events: EventBus,
    is_connected: AtomicBool,
}

impl RelayClient {
    /// Dial the relay and assemble a ready client.
    pub async fn connect(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        peer_factory: Arc<dyn PeerTransportFactory>,
        media_source: Arc<dyn MediaSource>,
    ) -> ClientResult<Arc<Self>> {
        let (transport, transport_events) = transport_factory
            .create_transport()
            .await
            .map_err(ClientError::Transport)?;

        let identity = Arc::new(IdentityManager::new());
        let events = EventBus::new();
        let calls = CallManager::new(
            config,
            SignalingRouter::new(transport.clone()),
            peer_factory,
            identity.clone(),
            events.clone(),
        );
        let handler = InboundHandler::new(identity.clone(), calls.clone(), events.clone());

        let client = Arc::new(Self {
            identity,
            calls,
            media_source,
            transport,
            handler,
            events,
            is_connected: AtomicBool::new(false),
        });
        client.spawn_read_pump(transport_events);
        Ok(client)
    }

    fn spawn_read_pump(self: &Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Connected => {
                        client.is_connected.store(true, Ordering::SeqCst);
                        client.events.dispatch(&Event::Connected);
                    }
                    TransportEvent::FrameReceived(frame) => {
                        client.handler.handle_frame(&frame).await;
                    }
                    TransportEvent::Disconnected => {
                        client.handle_disconnected().await;
                        break;
                    }
                }
            }
            debug!("transport event pump finished");
        });
    }

    async fn handle_disconnected(&self) {
        if !self.is_connected.swap(false, Ordering::SeqCst) {
            return;
        }
        // The identity never outlives the connection, and neither can the
        // call: a dead bus can never complete its signaling.
        self.identity.clear();
        self.calls.handle_bus_disconnected().await;
        self.events.dispatch(&Event::Disconnected);
    }

    /// Acquire the local capture source and make it available to calls.
    ///
    /// Failure is surfaced directly: without media no call can be placed.
    pub async fn acquire_media(&self, video: bool, audio: bool) -> ClientResult<MediaHandle> {
        let handle = self.media_source.acquire(video, audio).await?;
        self.calls.set_local_media(handle.clone()).await;
        Ok(handle)
    }

    // --- the five user-facing entry points ---

    /// Change the display name attached to future outgoing invites.
    pub async fn set_display_name(&self, name: impl Into<String>) {
        self.calls.set_display_name(name.into()).await;
    }

    /// This client's relay identity, once assigned. This is the value the
    /// user shares out-of-band so someone can call them.
    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity.current()
    }

    /// Call the peer holding the given relay identity.
    pub async fn place_call(&self, target: SessionIdentity) -> ClientResult<()> {
        self.calls.place_call(target).await.map_err(Into::into)
    }

    /// Answer the currently ringing incoming call.
    pub async fn answer(&self) -> ClientResult<()> {
        self.calls.answer().await.map_err(Into::into)
    }

    /// End the current call, from any state. Idempotent.
    pub async fn end_call(&self) {
        self.calls.end_call().await;
    }

    // --- observables ---

    pub async fn call_state(&self) -> CallState {
        self.calls.call_state().await
    }

    pub async fn peer_identity(&self) -> Option<SessionIdentity> {
        self.calls.peer_identity().await
    }

    pub async fn peer_display_name(&self) -> Option<String> {
        self.calls.peer_display_name().await
    }

    pub async fn local_media(&self) -> Option<MediaHandle> {
        self.calls.local_media().await
    }

    pub async fn remote_media(&self) -> Option<MediaHandle> {
        self.calls.remote_media().await
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.events.add_handler(handler);
    }

    /// Close the relay connection, invalidating the session identity and
    /// tearing down any live call.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        self.handle_disconnected().await;
    }
}
