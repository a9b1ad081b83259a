//! Connection session: connect, authenticate, sync, stream, reconnect.
//!
//! One [`Session`] owns one logical connection to the remote instance and
//! drives the lifecycle
//! `Disconnected → Connecting → Authenticating → Syncing → Streaming`,
//! falling back to `Disconnected` on any failure and retrying after the
//! configured backoff until a stop is requested.
//!
//! During boot (connect through sync) the session owns both connection
//! halves and performs requests synchronously. Once streaming starts, the
//! sink half moves behind a mutex shared with every outbound writer and the
//! read loop becomes the sole reader, correlating replies by request id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use relay_core::constants::METADATA_VERSION;
use relay_core::namespace::{LocalTarget, NamespaceMapError, match_wildcard};
use relay_core::{BridgeError, ClientId, NamespaceMap, RequestId};
use relay_host::{EventBus, NamespaceInfo, PluginLifecycle, ServiceDesc, ServiceRegistry, StateStore};
use relay_protocol::{Inbound, Reply, Request, RequestType};
use relay_settings::BridgeSettings;

use crate::correlation::CorrelationTable;
use crate::transport::{Connector, TransportMessage, TransportSink, TransportStream};

/// One bridge session. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    pub(crate) name: String,
    pub(crate) settings: BridgeSettings,
    pub(crate) client_id: ClientId,
    pub(crate) map: NamespaceMap,
    pub(crate) registry: Arc<dyn ServiceRegistry>,
    pub(crate) bus: Arc<dyn EventBus>,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) lifecycle: Arc<dyn PluginLifecycle>,
    pub(crate) connector: Arc<dyn Connector>,
    /// Write half of the live connection; `None` while disconnected.
    /// Single-writer discipline: every outbound frame goes through this lock.
    pub(crate) sink: Mutex<Option<Box<dyn TransportSink>>>,
    pub(crate) correlation: CorrelationTable,
    pub(crate) streaming: AtomicBool,
    pub(crate) stopping: AtomicBool,
    stop_notify: Notify,
}

impl Session {
    /// Create a session from validated settings and injected collaborators.
    pub fn new(
        name: impl Into<String>,
        settings: BridgeSettings,
        connector: Arc<dyn Connector>,
        registry: Arc<dyn ServiceRegistry>,
        bus: Arc<dyn EventBus>,
        store: Arc<dyn StateStore>,
        lifecycle: Arc<dyn PluginLifecycle>,
    ) -> Result<Self, NamespaceMapError> {
        let name = name.into();
        let client_id = settings
            .client_name
            .clone()
            .map(ClientId::from_string)
            .unwrap_or_else(|| ClientId::derive(&name));
        let map = NamespaceMap::new(
            settings
                .remote_namespaces
                .iter()
                .map(|(local, remote)| (local.clone(), remote.clone())),
        )?;

        Ok(Self {
            inner: Arc::new(SessionInner {
                name,
                settings,
                client_id,
                map,
                registry,
                bus,
                store,
                lifecycle,
                connector,
                sink: Mutex::new(None),
                correlation: CorrelationTable::new(),
                streaming: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                stop_notify: Notify::new(),
            }),
        })
    }

    /// This bridge's stable client identifier.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.inner.client_id
    }

    /// The bridge's own local namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.settings.namespace
    }

    /// Metadata reported to the lifecycle collaborator.
    #[must_use]
    pub fn metadata(&self) -> Value {
        json!({ "version": METADATA_VERSION })
    }

    /// Whether the read loop is live and public operations are accepted.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.inner.streaming.load(Ordering::SeqCst)
    }

    /// Invoke a service across the bridge (or a local `stream` pseudo-service).
    pub async fn call_service(
        &self,
        namespace: &str,
        domain: &str,
        service: &str,
        data: Value,
    ) -> Result<Option<Value>, BridgeError> {
        self.inner.call_service(namespace, domain, service, data).await
    }

    /// Fire an event on the remote side.
    pub async fn fire_event(
        &self,
        event: &str,
        namespace: &str,
        data: Value,
    ) -> Result<(), BridgeError> {
        self.inner.fire_event(event, namespace, data).await
    }

    /// Set remote entity state (sugar for `call_service(ns, "state", "set")`).
    pub async fn set_state(
        &self,
        namespace: &str,
        entity_id: &str,
        data: Value,
    ) -> Result<Option<Value>, BridgeError> {
        self.inner.set_state(namespace, entity_id, data).await
    }

    /// Run the session until [`stop`](Session::stop) is called.
    ///
    /// This is the five-state machine: each pass attempts a full
    /// connect/authenticate/sync, then streams until an error; failures
    /// tear down and retry after the backoff. A stop request aborts the
    /// pass wherever it is, boot phase included.
    pub async fn run(&self) {
        let inner = &self.inner;
        let mut first_time = true;
        let mut already_notified = false;

        while !inner.stopping.load(Ordering::SeqCst) {
            let error = tokio::select! {
                result = inner.connect_and_stream(&mut first_time, &mut already_notified) => {
                    result.err()
                }
                () = inner.stop_notify.notified() => None,
            };
            inner.teardown(&mut already_notified).await;

            if let Some(err) = error {
                if !inner.stopping.load(Ordering::SeqCst) {
                    warn!(
                        error = %err,
                        backoff_ms = inner.settings.reconnect_delay_ms,
                        "disconnected from remote instance, retrying"
                    );
                    inner.backoff().await;
                }
            }
        }

        info!(name = %inner.name, "disconnecting from remote instance");
        inner.streaming.store(false, Ordering::SeqCst);
    }

    /// Request a stop: close the connection and wake the run loop so it
    /// exits without a final backoff sleep. The notification carries a
    /// permit, so a session blocked mid-handshake (before the sink reaches
    /// the shared mutex) is interrupted too.
    pub async fn stop(&self) {
        debug!(name = %self.inner.name, "stop requested");
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.streaming.store(false, Ordering::SeqCst);
        self.inner.stop_notify.notify_one();
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            sink.close().await;
        }
    }
}

impl SessionInner {
    /// One full connection attempt. Returns only on error (including the
    /// connection closing after a stop request); the caller tears down.
    async fn connect_and_stream(
        self: &Arc<Self>,
        first_time: &mut bool,
        already_notified: &mut bool,
    ) -> Result<(), BridgeError> {
        // Connecting
        let (mut sink, mut stream) = self.connector.connect().await?;

        // Authenticating
        info!(client_name = %self.client_id, "authenticating to remote instance");
        let hello = Request::hello(
            RequestId::new(),
            self.client_id.as_str(),
            self.settings.api_key.as_deref(),
        );
        let reply = boot_request(sink.as_mut(), stream.as_mut(), &hello)
            .await?
            .ok_or_else(|| BridgeError::Auth("no reply to hello".to_string()))?;
        if !reply.is_success() {
            warn!(error = ?reply.response_error, "authentication rejected by remote instance");
            return Err(BridgeError::Auth(
                reply
                    .response_error
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        info!(version = ?reply.data.get("version"), "connected to remote instance");

        // Syncing: local pseudo-services first
        self.register_stream_services();

        let services = self.fetch_remote_services(sink.as_mut(), stream.as_mut()).await?;
        for desc in services {
            if let Some(target) = self.map.translate_inbound(&self.client_id, &desc.namespace) {
                let local = self.resolve_target(&target);
                self.registry.register_service(
                    &self.name,
                    &local,
                    &desc.domain,
                    &desc.service,
                    self.service_handler(),
                );
            }
        }

        let snapshot = self.fetch_complete_state(sink.as_mut(), stream.as_mut()).await?;
        let mut namespaces: Vec<String> =
            self.map.local_namespaces().map(ToString::to_string).collect();
        namespaces.push(self.settings.namespace.clone());

        // Streaming begins: hand the sink to the shared write path.
        *self.sink.lock().await = Some(sink);
        self.streaming.store(true, Ordering::SeqCst);
        *already_notified = false;

        self.spawn_static_subscriptions();

        let namespace_info = NamespaceInfo {
            namespace: self.settings.namespace.clone(),
            namespaces,
        };
        self.lifecycle
            .notify_started(
                &self.name,
                namespace_info,
                json!({ "version": METADATA_VERSION }),
                Value::Object(snapshot),
                *first_time,
            )
            .await;
        *first_time = false;

        self.setup_forwarding().await;

        // Streaming: the read loop is the sole reader.
        loop {
            match stream.recv().await? {
                TransportMessage::Text(text) => self.handle_frame(&text).await?,
                TransportMessage::Binary(bytes) => {
                    debug!(len = bytes.len(), "ignoring inbound binary frame");
                }
            }
        }
    }

    /// Classify and handle one inbound text frame.
    async fn handle_frame(self: &Arc<Self>, text: &str) -> Result<(), BridgeError> {
        match Inbound::classify(text).map_err(|e| BridgeError::Protocol(e.to_string()))? {
            Inbound::Event { namespace, payload } => {
                if let Some(target) = self.map.translate_inbound(&self.client_id, &namespace) {
                    self.process_remote_request(target, payload).await;
                } else {
                    debug!(%namespace, "rejecting event in unmapped namespace");
                }
            }
            Inbound::Reply(reply) => match reply.response_id.clone() {
                Some(id) => {
                    if !self.correlation.deliver(&id, reply) {
                        debug!(response_id = %id, "dropping unmatched response");
                    }
                }
                None => debug!("dropping response without response_id"),
            },
        }
        Ok(())
    }

    /// Register the always-present `stream` pseudo-services.
    fn register_stream_services(self: &Arc<Self>) {
        for service in ["subscribe", "unsubscribe", "send_bytes"] {
            self.registry.register_service(
                &self.name,
                &self.settings.namespace,
                "stream",
                service,
                self.service_handler(),
            );
        }
    }

    /// Fetch the remote service catalog (boot phase).
    async fn fetch_remote_services(
        &self,
        sink: &mut dyn TransportSink,
        stream: &mut dyn TransportStream,
    ) -> Result<Vec<ServiceDesc>, BridgeError> {
        let request = Request::get_services(RequestId::new());
        let Some(reply) = boot_request(sink, stream, &request).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_value(reply.data) {
            Ok(services) => Ok(services),
            Err(err) => {
                warn!(error = %err, "unusable remote service catalog");
                Ok(Vec::new())
            }
        }
    }

    /// Fetch complete remote state per mapped namespace (boot phase) and
    /// assemble the combined snapshot, always including an empty entry for
    /// the bridge's own namespace.
    async fn fetch_complete_state(
        &self,
        sink: &mut dyn TransportSink,
        stream: &mut dyn TransportStream,
    ) -> Result<Map<String, Value>, BridgeError> {
        let mut snapshot = Map::new();

        let remotes: Vec<String> = self.map.remote_namespaces().map(ToString::to_string).collect();
        for remote in remotes {
            let Some(local) = self.map.to_local(&remote) else {
                continue;
            };
            let request = Request::get_state(RequestId::new(), &remote);
            let state = match boot_request(sink, stream, &request).await? {
                Some(reply) if !reply.data.is_null() => reply.data,
                _ => {
                    warn!(namespace = %local, "no state data available for namespace");
                    Value::Object(Map::new())
                }
            };
            let _ = snapshot.insert(local.to_string(), state);
        }

        let _ = snapshot.insert(self.settings.namespace.clone(), Value::Object(Map::new()));
        debug!(namespaces = snapshot.len(), "assembled complete state snapshot");
        Ok(snapshot)
    }

    /// Issue the configured static subscriptions, each delayed to let the
    /// session settle.
    fn spawn_static_subscriptions(self: &Arc<Self>) {
        let Some(subscriptions) = self.settings.subscriptions.clone() else {
            return;
        };
        for subscription in subscriptions.state {
            self.spawn_subscription(RequestType::ListenState, subscription);
        }
        for subscription in subscriptions.event {
            self.spawn_subscription(RequestType::ListenEvent, subscription);
        }
    }

    /// Fire-and-forget subscription task: settle delay, namespace admission
    /// check, then a correlated listen request.
    pub(crate) fn spawn_subscription(self: &Arc<Self>, kind: RequestType, subscription: Value) {
        let weak = Arc::downgrade(self);
        let delay = Duration::from_millis(self.settings.subscription_delay_ms);
        drop(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else { return };

            let Some(namespace) = subscription.get("namespace").and_then(Value::as_str) else {
                warn!(?subscription, "subscription without namespace");
                return;
            };

            let accept = namespace.starts_with(this.client_id.as_str())
                || this
                    .map
                    .remote_namespaces()
                    .any(|remote| match_wildcard(remote, &[namespace]));
            if !accept {
                warn!(%namespace, "cannot subscribe, namespace not defined in remote namespaces");
                return;
            }

            match this.stream_subscribe(kind, subscription.clone()).await {
                Ok(Some(handle)) => info!(?subscription, ?handle, "subscription established"),
                Ok(None) => warn!(?subscription, "subscription produced no handle"),
                Err(err) => warn!(?subscription, error = %err, "subscription failed"),
            }
        }));
    }

    /// Register local event-bus callbacks for forwarding and the
    /// remote-addressed instruction subscription (`"<clientId>*"`).
    async fn setup_forwarding(self: &Arc<Self>) {
        let Some(rule) = self.settings.forward_namespaces.clone() else {
            return;
        };

        if rule.non_restricted_namespaces.is_empty() {
            self.bus
                .add_callback(&self.name, "*", self.forward_handler())
                .await;
        } else {
            for namespace in &rule.non_restricted_namespaces {
                self.bus
                    .add_callback(&self.name, namespace, self.forward_handler())
                    .await;
            }
        }

        let subscription = json!({
            "namespace": format!("{}*", self.client_id),
            "event": "*",
        });
        self.spawn_subscription(RequestType::ListenEvent, subscription);
    }

    /// Map an accepted inbound target to a concrete local namespace.
    pub(crate) fn resolve_target(&self, target: &LocalTarget) -> String {
        target
            .name()
            .unwrap_or(&self.settings.namespace)
            .to_string()
    }

    /// Tear down after a failure episode: clear callbacks and bindings,
    /// drop the connection, abandon in-flight requests, and notify the
    /// lifecycle collaborator exactly once per episode.
    async fn teardown(&self, already_notified: &mut bool) {
        if self.settings.forward_namespaces.is_some() {
            self.bus.clear_callbacks(&self.name).await;
        }
        self.registry.clear_services(&self.name);

        self.streaming.store(false, Ordering::SeqCst);

        if let Some(mut sink) = self.sink.lock().await.take() {
            sink.close().await;
        }
        self.correlation.clear();

        if !*already_notified {
            self.lifecycle
                .notify_stopped(&self.name, &self.settings.namespace)
                .await;
            *already_notified = true;
        }
    }

    /// Sleep out the reconnect backoff, breaking early on stop.
    async fn backoff(&self) {
        let delay = Duration::from_millis(self.settings.reconnect_delay_ms);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = self.stop_notify.notified() => {}
        }
    }
}

/// Synchronous request during the boot phase: nothing else is using the
/// connection yet, so send and block for the reply on the owned stream.
/// Events arriving in between are dropped.
async fn boot_request(
    sink: &mut dyn TransportSink,
    stream: &mut dyn TransportStream,
    request: &Request,
) -> Result<Option<Reply>, BridgeError> {
    let text = request
        .to_text()
        .map_err(|e| BridgeError::Protocol(e.to_string()))?;
    sink.send_text(text).await?;

    loop {
        match stream.recv().await? {
            TransportMessage::Binary(_) => continue,
            TransportMessage::Text(text) => match Inbound::classify(&text) {
                Ok(Inbound::Reply(reply)) => return Ok(Some(reply)),
                Ok(Inbound::Event { namespace, .. }) => {
                    debug!(%namespace, "dropping event received during boot");
                }
                Err(err) => return Err(BridgeError::Protocol(err.to_string())),
            },
        }
    }
}
