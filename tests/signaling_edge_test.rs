//! Edge behavior of the signaling layer: identity degradation, invite
//! conflicts, media failures and disconnect teardown.

use peercall::test_utils::{FakeMediaSource, FakePeerFactory, InMemoryRelay};
use peercall::{
    CallState, ClientConfig, ClientError, EndReason, MediaError, RelayClient, SessionIdentity,
};
use std::sync::Arc;
use std::time::Duration;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn connect_client(
    relay: &InMemoryRelay,
    display_name: &str,
    peers: Arc<FakePeerFactory>,
) -> Arc<RelayClient> {
    let client = RelayClient::connect(
        ClientConfig {
            display_name: display_name.to_string(),
            ..Default::default()
        },
        Arc::new(relay.clone()),
        peers,
        Arc::new(FakeMediaSource::new()),
    )
    .await
    .expect("client should connect");
    client
        .acquire_media(true, true)
        .await
        .expect("fake media should be available");
    client
}

async fn wait_identity(client: &RelayClient) -> SessionIdentity {
    for _ in 0..400 {
        if let Some(id) = client.identity() {
            return id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("identity never assigned");
}

async fn wait_state(client: &RelayClient, pred: fn(&CallState) -> bool) -> CallState {
    for _ in 0..400 {
        let state = client.call_state().await;
        if pred(&state) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "state never reached; last = {:?}",
        client.call_state().await
    );
}

/// A client the relay never gave an identity can still place a call; the
/// invite just carries an empty return address, so the answer has nowhere
/// to go and the caller rings forever.
#[tokio::test]
async fn test_unassigned_identity_degrades_to_no_return_address() {
    init_logs();
    let relay = InMemoryRelay::without_identity_assignment();
    let a = connect_client(&relay, "Alice", Arc::new(FakePeerFactory::new())).await;
    let b = connect_client(&relay, "Bob", Arc::new(FakePeerFactory::new())).await;
    assert_eq!(a.identity(), None);

    // The relay knows the clients as peer-1 / peer-2 even though it never
    // told them; the test plays the out-of-band identity exchange.
    a.place_call(SessionIdentity::new("peer-2")).await.unwrap();

    wait_state(&b, CallState::is_ringing).await;
    assert_eq!(b.peer_identity().await, Some(SessionIdentity::new("")));

    // The accept is addressed to the empty identity and silently dropped.
    b.answer().await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(a.call_state().await.is_inviting());
}

/// Documented conflict policy: while a session is live, a second inbound
/// invite is rejected and the first call proceeds undisturbed.
#[tokio::test]
async fn test_second_invite_rejected_while_ringing() {
    init_logs();
    let relay = InMemoryRelay::new();
    let a = connect_client(&relay, "Alice", Arc::new(FakePeerFactory::new())).await;
    let b = connect_client(&relay, "Bob", Arc::new(FakePeerFactory::new())).await;
    let c = connect_client(&relay, "Carol", Arc::new(FakePeerFactory::new())).await;
    let a_id = wait_identity(&a).await;
    wait_identity(&b).await;
    let c_id = wait_identity(&c).await;

    a.place_call(c_id.clone()).await.unwrap();
    wait_state(&c, CallState::is_ringing).await;

    b.place_call(c_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Carol still belongs to Alice's call.
    assert_eq!(c.peer_identity().await, Some(a_id.clone()));

    c.answer().await.unwrap();
    wait_state(&a, CallState::is_active).await;
    wait_state(&c, CallState::is_active).await;
    assert_eq!(c.peer_identity().await, Some(a_id));

    // Bob is stuck inviting; nobody will ever answer.
    assert!(b.call_state().await.is_inviting());
}

/// Capture failure surfaces to the user; the call cannot be placed.
#[tokio::test]
async fn test_media_unavailable_surfaces() {
    init_logs();
    let relay = InMemoryRelay::new();
    let client = RelayClient::connect(
        ClientConfig::default(),
        Arc::new(relay.clone()),
        Arc::new(FakePeerFactory::new()),
        Arc::new(FakeMediaSource::failing()),
    )
    .await
    .expect("client should connect");

    let err = client.acquire_media(true, true).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Media(MediaError::Unavailable(_))
    ));
}

/// Placing a call before media was ever acquired silently does nothing:
/// there is no handle to attach, so no session and no invite.
#[tokio::test]
async fn test_place_call_without_media_is_noop() {
    init_logs();
    let relay = InMemoryRelay::new();
    let a = RelayClient::connect(
        ClientConfig::default(),
        Arc::new(relay.clone()),
        Arc::new(FakePeerFactory::new()),
        Arc::new(FakeMediaSource::new()),
    )
    .await
    .expect("client should connect");
    let b = connect_client(&relay, "Bob", Arc::new(FakePeerFactory::new())).await;
    wait_identity(&a).await;
    let b_id = wait_identity(&b).await;

    a.place_call(b_id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(a.call_state().await, CallState::Idle));
    assert!(matches!(b.call_state().await, CallState::Idle));
}

/// The display name is mutable any time before the call; the invite
/// carries whatever it was at send time.
#[tokio::test]
async fn test_display_name_mutable_until_call() {
    init_logs();
    let relay = InMemoryRelay::new();
    let a = connect_client(&relay, "", Arc::new(FakePeerFactory::new())).await;
    let b = connect_client(&relay, "", Arc::new(FakePeerFactory::new())).await;
    wait_identity(&a).await;
    let b_id = wait_identity(&b).await;

    a.set_display_name("Ally").await;
    a.set_display_name("Alice").await;
    a.place_call(b_id).await.unwrap();

    wait_state(&b, CallState::is_ringing).await;
    assert_eq!(b.peer_display_name().await, Some("Alice".to_string()));
}

/// Disconnecting invalidates the transient identity and ends the live
/// call; neither survives the connection.
#[tokio::test]
async fn test_disconnect_invalidates_identity_and_ends_call() {
    init_logs();
    let relay = InMemoryRelay::new();
    let a_peers = Arc::new(FakePeerFactory::new());
    let a = connect_client(&relay, "Alice", a_peers.clone()).await;
    let b = connect_client(&relay, "Bob", Arc::new(FakePeerFactory::new())).await;
    wait_identity(&a).await;
    let b_id = wait_identity(&b).await;

    a.place_call(b_id).await.unwrap();
    wait_state(&b, CallState::is_ringing).await;
    b.answer().await.unwrap();
    wait_state(&a, CallState::is_active).await;

    a.disconnect().await;

    assert_eq!(a.identity(), None);
    assert!(!a.is_connected());
    match a.call_state().await {
        CallState::Ended { reason, .. } => assert_eq!(reason, EndReason::ConnectionLost),
        other => panic!("expected Ended, got {:?}", other),
    }
    assert_eq!(a_peers.latest().unwrap().terminate_count(), 1);
}
