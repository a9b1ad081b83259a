//! End-to-end session tests against a scripted remote instance.
//!
//! The fake remote answers boot-phase requests synchronously from inside the
//! sink, which keeps the tests deterministic without a server task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use relay_core::constants::ORIGIN_KEY;
use relay_core::errors::TransportError;
use relay_core::{BridgeError, ForwardingRule};
use relay_host::{
    EventBus as _, MemoryEventBus, MemoryLifecycle, MemoryServiceRegistry, MemoryStateStore,
    ServiceDesc, ServiceRegistry as _,
};
use relay_session::{Connector, Session, TransportMessage, TransportSink, TransportStream};
use relay_settings::BridgeSettings;

// ─────────────────────────────────────────────────────────────────────────────
// Scripted remote
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeRemote {
    /// Every outbound frame, parsed.
    sent: Mutex<Vec<Value>>,
    /// Feed into the currently-open connection's read half.
    tx: Mutex<Option<mpsc::UnboundedSender<TransportMessage>>>,
    connects: AtomicUsize,
    reject_auth: AtomicBool,
    /// When set, `hello` gets no reply (stalled handshake).
    mute_hello: AtomicBool,
    /// When set, `call_service` requests get no reply (timeout path).
    mute_call_service: AtomicBool,
    /// remote namespace → complete state.
    state: Mutex<Value>,
    /// Remote service catalog, as `get_services` reply data.
    services: Mutex<Value>,
}

impl FakeRemote {
    fn new() -> Arc<Self> {
        let remote = Self::default();
        *remote.state.lock() = json!({});
        *remote.services.lock() = json!([]);
        Arc::new(remote)
    }

    fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    fn sent_of_type(&self, request_type: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|frame| frame["request_type"] == request_type)
            .collect()
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Push an `event` frame into the open connection.
    fn push_event(&self, namespace: &str, mut payload: Value) {
        if let Some(obj) = payload.as_object_mut() {
            let _ = obj.insert("namespace".to_string(), json!(namespace));
        }
        let frame = json!({ "response_type": "event", "data": payload });
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(TransportMessage::Text(frame.to_string()));
        }
    }

    /// Drop the connection from the remote end.
    fn disconnect(&self) {
        let _ = self.tx.lock().take();
    }

    fn reply_for(&self, request: &Value) -> Option<Value> {
        let id = request.get("request_id")?.clone();
        let data = match request["request_type"].as_str()? {
            "hello" => {
                if self.mute_hello.load(Ordering::SeqCst) {
                    return None;
                }
                if self.reject_auth.load(Ordering::SeqCst) {
                    return Some(json!({
                        "response_id": id,
                        "response_success": false,
                        "response_error": "bad password",
                        "data": null,
                    }));
                }
                json!({ "version": "4.2" })
            }
            "get_services" => self.services.lock().clone(),
            "get_state" => {
                let namespace = request["data"]["namespace"].as_str().unwrap_or_default();
                self.state.lock().get(namespace).cloned().unwrap_or(Value::Null)
            }
            "call_service" => {
                if self.mute_call_service.load(Ordering::SeqCst) {
                    return None;
                }
                json!({ "ok": true })
            }
            "listen_state" | "listen_event" => json!("handle-1"),
            _ => return None,
        };
        Some(json!({ "response_id": id, "response_success": true, "data": data }))
    }
}

struct FakeConnector(Arc<FakeRemote>);

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.tx.lock() = Some(tx);
        let _ = self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok((Box::new(FakeSink(self.0.clone())), Box::new(FakeStream(rx))))
    }
}

struct FakeSink(Arc<FakeRemote>);

#[async_trait]
impl TransportSink for FakeSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let frame: Value = serde_json::from_str(&text).map_err(|e| TransportError::Io(e.to_string()))?;
        self.0.sent.lock().push(frame.clone());

        if let Some(reply) = self.0.reply_for(&frame) {
            match self.0.tx.lock().as_ref() {
                Some(tx) => {
                    let _ = tx.send(TransportMessage::Text(reply.to_string()));
                }
                None => return Err(TransportError::Closed),
            }
        }
        Ok(())
    }

    async fn send_binary(&mut self, _bytes: Vec<u8>) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.0.tx.lock().take();
    }
}

struct FakeStream(mpsc::UnboundedReceiver<TransportMessage>);

#[async_trait]
impl TransportStream for FakeStream {
    async fn recv(&mut self) -> Result<TransportMessage, TransportError> {
        self.0.recv().await.ok_or(TransportError::Closed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    session: Session,
    registry: Arc<MemoryServiceRegistry>,
    bus: Arc<MemoryEventBus>,
    store: Arc<MemoryStateStore>,
    lifecycle: Arc<MemoryLifecycle>,
}

fn test_settings() -> BridgeSettings {
    let mut settings = BridgeSettings {
        ad_url: "http://remote:5050".to_string(),
        request_timeout_ms: 200,
        reconnect_delay_ms: 10,
        subscription_delay_ms: 1,
        ..BridgeSettings::default()
    };
    let _ = settings
        .remote_namespaces
        .insert("roomA".to_string(), "upstairs".to_string());
    settings
}

fn build(settings: BridgeSettings, remote: &Arc<FakeRemote>) -> Harness {
    let registry = Arc::new(MemoryServiceRegistry::new());
    let bus = Arc::new(MemoryEventBus::new());
    let store = Arc::new(MemoryStateStore::new());
    let lifecycle = Arc::new(MemoryLifecycle::new());

    let session = Session::new(
        "relay",
        settings,
        Arc::new(FakeConnector(remote.clone())),
        registry.clone(),
        bus.clone(),
        store.clone(),
        lifecycle.clone(),
    )
    .expect("valid namespace mapping");

    Harness {
        session,
        registry,
        bus,
        store,
        lifecycle,
    }
}

impl Harness {
    fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let session = self.session.clone();
        tokio::spawn(async move { session.run().await })
    }

    async fn wait_streaming(&self) {
        let session = self.session.clone();
        wait_until("streaming", move || session.is_streaming()).await;
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn boot_sync_produces_snapshot_and_bindings() {
    let remote = FakeRemote::new();
    *remote.state.lock() = json!({
        "upstairs": { "light.hall": { "state": "on" } },
    });
    *remote.services.lock() = json!([
        { "namespace": "upstairs", "domain": "light", "service": "turn_on" },
    ]);

    let harness = build(test_settings(), &remote);
    let task = harness.spawn();
    harness.wait_streaming().await;

    let started = harness.lifecycle.started();
    assert_eq!(started.len(), 1);
    assert!(started[0].first_time);
    assert_eq!(started[0].namespace_info.namespace, "default");
    assert_eq!(started[0].namespace_info.namespaces, vec!["roomA", "default"]);
    assert_eq!(started[0].state_snapshot["roomA"]["light.hall"]["state"], "on");
    assert_eq!(started[0].state_snapshot["default"], json!({}));
    assert_eq!(started[0].metadata["version"], "1.0");

    // Remote catalog entry landed under the translated local namespace,
    // stream pseudo-services under the bridge's own.
    let services = harness.registry.list_services();
    assert!(services.contains(&ServiceDesc {
        namespace: "roomA".into(),
        domain: "light".into(),
        service: "turn_on".into(),
    }));
    assert!(services.contains(&ServiceDesc {
        namespace: "default".into(),
        domain: "stream".into(),
        service: "subscribe".into(),
    }));

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn auth_rejection_retries_without_started_notification() {
    let remote = FakeRemote::new();
    remote.reject_auth.store(true, Ordering::SeqCst);

    let harness = build(test_settings(), &remote);
    let task = harness.spawn();

    {
        let remote = remote.clone();
        wait_until("second connection attempt", move || remote.connects() >= 2).await;
    }
    assert!(harness.lifecycle.started().is_empty());
    // One stopped notification per failure episode, and this is all one
    // episode until a sync succeeds.
    assert_eq!(harness.lifecycle.stopped().len(), 1);

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn stop_during_stalled_handshake_unblocks_run() {
    let remote = FakeRemote::new();
    remote.mute_hello.store(true, Ordering::SeqCst);

    let harness = build(test_settings(), &remote);
    let task = harness.spawn();

    // The session sends `hello` and then blocks waiting for a reply that
    // never comes; the sink has not reached the shared mutex yet.
    {
        let remote = remote.clone();
        wait_until("hello sent", move || !remote.sent_of_type("hello").is_empty()).await;
    }

    harness.session.stop().await;
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("run loop must exit on stop during the handshake")
        .unwrap();
}

#[tokio::test]
async fn disconnect_reconnects_and_notifies_stopped_once() {
    let remote = FakeRemote::new();
    let harness = build(test_settings(), &remote);
    let task = harness.spawn();
    harness.wait_streaming().await;

    remote.disconnect();
    {
        let lifecycle = harness.lifecycle.clone();
        wait_until("reconnected", move || lifecycle.started().len() >= 2).await;
    }

    assert_eq!(harness.lifecycle.stopped().len(), 1);
    assert!(!harness.lifecycle.started()[1].first_time);

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn disconnect_clears_forwarding_callbacks() {
    let remote = FakeRemote::new();
    let mut settings = test_settings();
    settings.forward_namespaces = Some(ForwardingRule::default());
    // Park the session in backoff after the failure so the next sync
    // cannot re-register callbacks before the assertion runs.
    settings.reconnect_delay_ms = 60_000;

    let harness = build(settings, &remote);
    let task = harness.spawn();
    harness.wait_streaming().await;
    {
        let bus = harness.bus.clone();
        wait_until("forwarding callback", move || bus.callback_count() >= 1).await;
    }

    remote.disconnect();
    {
        let lifecycle = harness.lifecycle.clone();
        wait_until("stopped notification", move || !lifecycle.stopped().is_empty()).await;
    }
    assert_eq!(harness.bus.callback_count(), 0);

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn remote_get_state_request_is_answered() {
    let remote = FakeRemote::new();
    let harness = build(test_settings(), &remote);
    harness
        .store
        .set_entity("roomA", "light.hall", json!({ "state": "on" }));
    let task = harness.spawn();
    harness.wait_streaming().await;

    remote.push_event(
        "upstairs",
        json!({ "event_type": "get_state", "data": {}, "request_id": "req-1" }),
    );

    {
        let remote = remote.clone();
        wait_until("get_state response", move || {
            !remote.sent_of_type("fire_event").is_empty()
        })
        .await;
    }

    let frame = remote.sent_of_type("fire_event").remove(0);
    let client = harness.session.client_id().as_str().to_string();
    assert_eq!(frame["data"]["namespace"], format!("{client}_roomA"));
    assert_eq!(frame["data"]["event"], "get_state_response");
    assert_eq!(frame["data"]["data"]["response_id"], "req-1");
    assert_eq!(
        frame["data"]["data"]["response"]["light.hall"]["state"],
        "on"
    );

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn own_origin_events_are_dropped() {
    let remote = FakeRemote::new();
    let harness = build(test_settings(), &remote);
    let task = harness.spawn();
    harness.wait_streaming().await;

    let client = harness.session.client_id().as_str().to_string();
    remote.push_event(
        "upstairs",
        json!({
            "event_type": "get_state",
            "data": { ORIGIN_KEY: client },
            "request_id": "req-loop",
        }),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(remote.sent_of_type("fire_event").is_empty());

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn call_service_translates_and_round_trips() {
    let remote = FakeRemote::new();
    let harness = build(test_settings(), &remote);
    let task = harness.spawn();
    harness.wait_streaming().await;

    let result = harness
        .session
        .call_service("roomA", "light", "turn_on", json!({ "entity_id": "light.hall" }))
        .await
        .unwrap();
    assert_eq!(result, Some(json!({ "ok": true })));

    let frames = remote.sent_of_type("call_service");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["data"]["namespace"], "upstairs");
    assert_eq!(frames[0]["data"]["domain"], "light");

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn request_timeout_keeps_the_connection_usable() {
    let remote = FakeRemote::new();
    remote.mute_call_service.store(true, Ordering::SeqCst);

    let harness = build(test_settings(), &remote);
    let task = harness.spawn();
    harness.wait_streaming().await;

    // No reply arrives; the call resolves to an absent result at the timeout.
    let result = harness
        .session
        .call_service("roomA", "light", "turn_on", json!({}))
        .await
        .unwrap();
    assert_eq!(result, None);
    assert!(harness.session.is_streaming());

    // The same connection still serves later requests.
    remote.mute_call_service.store(false, Ordering::SeqCst);
    let result = harness
        .session
        .call_service("roomA", "light", "turn_off", json!({}))
        .await
        .unwrap();
    assert_eq!(result, Some(json!({ "ok": true })));

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn call_service_unmapped_namespace_sends_nothing() {
    let remote = FakeRemote::new();
    let harness = build(test_settings(), &remote);
    let task = harness.spawn();
    harness.wait_streaming().await;

    let result = harness
        .session
        .call_service("attic", "light", "turn_on", json!({}))
        .await
        .unwrap();
    assert_eq!(result, None);
    assert!(remote.sent_of_type("call_service").is_empty());

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn fire_event_encodes_name_and_tags_origin() {
    let remote = FakeRemote::new();
    let harness = build(test_settings(), &remote);
    let task = harness.spawn();
    harness.wait_streaming().await;

    harness
        .session
        .fire_event("door bell", "roomA", json!({ "ring": true }))
        .await
        .unwrap();

    {
        let remote = remote.clone();
        wait_until("fire_event frame", move || {
            !remote.sent_of_type("fire_event").is_empty()
        })
        .await;
    }
    let frame = remote.sent_of_type("fire_event").remove(0);
    assert_eq!(frame["data"]["namespace"], "upstairs");
    assert_eq!(frame["data"]["event"], "door%20bell");
    assert_eq!(
        frame["data"]["data"][ORIGIN_KEY],
        harness.session.client_id().as_str()
    );
    assert!(frame.get("request_id").is_none());

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn operations_fail_typed_while_disconnected() {
    let remote = FakeRemote::new();
    let harness = build(test_settings(), &remote);
    // Never spawned: the session stays disconnected.

    let err = harness
        .session
        .call_service("roomA", "light", "turn_on", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotConnected { .. }));

    let err = harness
        .session
        .fire_event("ding", "roomA", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotConnected { .. }));
}

#[tokio::test]
async fn forwarding_readdresses_local_events_and_breaks_loops() {
    let remote = FakeRemote::new();
    let mut settings = test_settings();
    settings.forward_namespaces = Some(ForwardingRule::default());

    let harness = build(settings, &remote);
    let task = harness.spawn();
    harness.wait_streaming().await;
    {
        let bus = harness.bus.clone();
        wait_until("forwarding callback", move || bus.callback_count() >= 1).await;
    }

    harness
        .bus
        .process_event("kitchen", json!({ "event_type": "motion", "data": { "zone": 1 } }))
        .await;

    {
        let remote = remote.clone();
        wait_until("forwarded event", move || {
            !remote.sent_of_type("fire_event").is_empty()
        })
        .await;
    }
    let client = harness.session.client_id().as_str().to_string();
    let frame = remote.sent_of_type("fire_event").remove(0);
    assert_eq!(frame["data"]["namespace"], format!("{client}_kitchen"));
    assert_eq!(frame["data"]["event"], "motion");

    // An event the bridge itself injected must not bounce back out.
    let before = remote.sent_of_type("fire_event").len();
    harness
        .bus
        .process_event(
            "kitchen",
            json!({ "event_type": "motion", "data": { ORIGIN_KEY: client } }),
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.sent_of_type("fire_event").len(), before);

    harness.session.stop().await;
    task.await.unwrap();
}

#[tokio::test]
async fn streaming_setup_subscribes_to_client_addressed_events() {
    let remote = FakeRemote::new();
    let mut settings = test_settings();
    settings.forward_namespaces = Some(ForwardingRule::default());

    let harness = build(settings, &remote);
    let task = harness.spawn();
    harness.wait_streaming().await;

    {
        let remote = remote.clone();
        wait_until("listen_event subscription", move || {
            !remote.sent_of_type("listen_event").is_empty()
        })
        .await;
    }
    let client = harness.session.client_id().as_str().to_string();
    let frame = remote.sent_of_type("listen_event").remove(0);
    assert_eq!(frame["data"]["namespace"], format!("{client}*"));
    assert_eq!(frame["data"]["event"], "*");

    harness.session.stop().await;
    task.await.unwrap();
}
