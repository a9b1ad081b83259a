//! Outbound operations and inbound remote-request dispatch.
//!
//! Everything here runs against a live streaming session. Outbound writers
//! share the sink mutex with the fire-and-forget path; correlated requests
//! park on the correlation table until the read loop delivers the reply or
//! the timeout fires. Inbound `event` frames that survived namespace
//! admission land in [`SessionInner::process_remote_request`].

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, warn};

use relay_core::constants::ORIGIN_KEY;
use relay_core::namespace::LocalTarget;
use relay_core::{BridgeError, RequestId, TransportError};
use relay_host::{EventHandler, ServiceCall, ServiceDesc, ServiceHandler};
use relay_protocol::{RemoteEvent, Request, RequestType};

use crate::session::SessionInner;

impl SessionInner {
    /// Reject a public operation unless the session is streaming.
    pub(crate) fn ensure_streaming(&self, operation: &str) -> Result<(), BridgeError> {
        if self.streaming.load(Ordering::SeqCst) {
            Ok(())
        } else {
            warn!(operation, "attempt to use remote instance while disconnected");
            Err(BridgeError::not_connected(operation))
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Outbound operations
    // ─────────────────────────────────────────────────────────────────────

    /// Invoke a service: either one of the local `stream` pseudo-services or
    /// a service on the remote side, after outbound namespace translation.
    pub(crate) async fn call_service(
        self: &Arc<Self>,
        namespace: &str,
        domain: &str,
        service: &str,
        data: Value,
    ) -> Result<Option<Value>, BridgeError> {
        self.ensure_streaming("call_service")?;
        debug!(%namespace, %domain, %service, "service call");

        if namespace == self.settings.namespace && domain == "stream" {
            return self.stream_service(service, data).await;
        }

        let Some(remote) = self.map.translate_outbound(&self.client_id, namespace) else {
            warn!(%namespace, "unidentified namespace for service call");
            return Ok(None);
        };

        let request = Request::call_service(RequestId::new(), &remote, domain, service, data);
        let Some(reply) = self.process_request(request).await? else {
            return Ok(None);
        };

        if reply.is_success() {
            Ok(Some(reply.data))
        } else {
            warn!(error = ?reply.response_error, %domain, %service, "remote service call failed");
            debug!(request = ?reply.request, "failed request echo");
            Ok(None)
        }
    }

    /// Set remote entity state. Sugar for a `state/set` service call with
    /// the entity id folded into the payload.
    pub(crate) async fn set_state(
        self: &Arc<Self>,
        namespace: &str,
        entity_id: &str,
        data: Value,
    ) -> Result<Option<Value>, BridgeError> {
        self.ensure_streaming("set_state")?;
        let mut data = data;
        if let Some(obj) = data.as_object_mut() {
            let _ = obj.insert("entity_id".to_string(), json!(entity_id));
        }
        self.call_service(namespace, "state", "set", data).await
    }

    /// Fire an event on the remote side (fire-and-forget).
    ///
    /// The event name is URL-encoded and the payload tagged with this
    /// bridge's origin so the remote side can break forwarding loops.
    pub(crate) async fn fire_event(
        &self,
        event: &str,
        namespace: &str,
        data: Value,
    ) -> Result<(), BridgeError> {
        self.ensure_streaming("fire_event")?;

        let Some(remote) = self.map.translate_outbound(&self.client_id, namespace) else {
            warn!(%namespace, "unidentified namespace for fire_event");
            return Ok(());
        };

        let event = urlencoding::encode(event).into_owned();
        let mut data = data;
        if let Some(obj) = data.as_object_mut() {
            let _ = obj.insert(ORIGIN_KEY.to_string(), json!(self.client_id.as_str()));
        }

        self.send_fire_and_forget(Request::fire_event(&remote, &event, data))
            .await
    }

    /// Send a frame without expecting a response. A connection lost between
    /// the streaming check and the write is logged, not surfaced; the read
    /// loop owns reconnection.
    async fn send_fire_and_forget(&self, request: Request) -> Result<(), BridgeError> {
        let text = request
            .to_text()
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;

        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            None => warn!("attempt to send while disconnected"),
            Some(sink) => match sink.send_text(text).await {
                Ok(()) => {}
                Err(TransportError::Closed) => {
                    warn!(request_type = %request.request_type, "connection closed while sending");
                }
                Err(err) => {
                    warn!(request_type = %request.request_type, error = %err, "send failed");
                }
            },
        }
        Ok(())
    }

    /// Send a correlated request and wait for its reply.
    ///
    /// `Ok(None)` means the request made it out but no reply arrived: the
    /// timeout fired, or a disconnect abandoned the pending entry.
    pub(crate) async fn process_request(
        &self,
        request: Request,
    ) -> Result<Option<relay_protocol::Reply>, BridgeError> {
        let Some(id) = request.request_id.clone() else {
            return Err(BridgeError::Protocol(
                "correlated request without request_id".to_string(),
            ));
        };
        let rx = self.correlation.register(&id);

        let text = request
            .to_text()
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;
        {
            let mut sink = self.sink.lock().await;
            let Some(sink) = sink.as_mut() else {
                self.correlation.remove(&id);
                return Err(BridgeError::not_connected(request.request_type.as_str()));
            };
            if let Err(err) = sink.send_text(text).await {
                self.correlation.remove(&id);
                return Err(err.into());
            }
        }

        let timeout = Duration::from_millis(self.settings.request_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => {
                debug!(request_type = %request.request_type, "pending request abandoned by disconnect");
                Ok(None)
            }
            Err(_) => {
                warn!(request_type = %request.request_type, "timeout waiting for response");
                self.correlation.remove(&id);
                Ok(None)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stream pseudo-services
    // ─────────────────────────────────────────────────────────────────────

    /// Dispatch one of the local `stream/...` pseudo-services.
    async fn stream_service(
        self: &Arc<Self>,
        service: &str,
        data: Value,
    ) -> Result<Option<Value>, BridgeError> {
        match service {
            "subscribe" => {
                let Some(kind) = subscription_kind(&data, false) else {
                    warn!(?data, "subscribe requires a valid type and a subscription");
                    return Ok(None);
                };
                let Some(subscription) = data.get("subscription").cloned() else {
                    warn!(?data, "subscribe requires a subscription");
                    return Ok(None);
                };
                self.stream_subscribe(kind, subscription).await
            }
            "unsubscribe" => {
                let Some(kind) = subscription_kind(&data, true) else {
                    warn!(?data, "unsubscribe requires a valid type and a handle");
                    return Ok(None);
                };
                let Some(handle) = data.get("handle").cloned() else {
                    warn!(?data, "unsubscribe requires a handle");
                    return Ok(None);
                };
                self.stream_unsubscribe(kind, handle).await
            }
            "send_bytes" => {
                let Some(bytes) = extract_bytes(data.get("bytes_data")) else {
                    warn!("send_bytes requires bytes_data as a string or byte array");
                    return Ok(None);
                };
                self.send_bytes(bytes).await;
                Ok(None)
            }
            other => {
                warn!(service = other, "unrecognized stream service");
                Ok(None)
            }
        }
    }

    /// Issue a `listen_state` / `listen_event` subscription; the reply data
    /// is the handle needed to cancel it.
    pub(crate) async fn stream_subscribe(
        &self,
        kind: RequestType,
        subscription: Value,
    ) -> Result<Option<Value>, BridgeError> {
        let request = Request::listen(RequestId::new(), kind, subscription);
        let reply = self.process_request(request).await?;
        Ok(reply.map(|r| r.data))
    }

    /// Cancel a subscription by its handle.
    async fn stream_unsubscribe(
        &self,
        kind: RequestType,
        handle: Value,
    ) -> Result<Option<Value>, BridgeError> {
        let request = Request::cancel_listen(RequestId::new(), kind, handle);
        let reply = self.process_request(request).await?;
        Ok(reply.map(|r| r.data))
    }

    /// Push a raw binary frame down the connection.
    async fn send_bytes(&self, bytes: Vec<u8>) {
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            None => warn!("attempt to send bytes while disconnected"),
            Some(sink) => {
                if let Err(err) = sink.send_binary(bytes).await {
                    warn!(error = %err, "binary send failed");
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound remote requests
    // ─────────────────────────────────────────────────────────────────────

    /// Handle one admitted inbound event. Request-style events
    /// (`get_state`, `get_services`, `call_service`) produce a response
    /// fired back at `"<clientId>_<local>"`; anything unrecognized is
    /// re-injected into the local event bus with this bridge's origin tag.
    pub(crate) async fn process_remote_request(self: &Arc<Self>, target: LocalTarget, payload: Value) {
        let event: RemoteEvent = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "malformed remote request");
                return;
            }
        };

        // Our own traffic echoed back; break the loop here.
        if event.origin() == Some(self.client_id.as_str()) {
            return;
        }

        debug!(event_type = %event.event_type, target = ?target.name(), "remote request");

        let (result, response_type) = match event.event_type.as_str() {
            "service_registered" => {
                self.register_remote_service(&target, &event.data);
                return;
            }
            "get_state" => {
                let entity_id = event.data.get("entity_id").and_then(Value::as_str);
                let result = self.store.get_entity(target.name(), entity_id).await;
                (Some(result), "get_state_response")
            }
            "get_services" => {
                let services = self.list_matching_services(&target);
                (
                    Some(serde_json::to_value(services).unwrap_or_default()),
                    "get_services_response",
                )
            }
            "call_service" => {
                let Some(domain) = event.data.get("domain").and_then(Value::as_str) else {
                    warn!("remote call_service without domain");
                    return;
                };
                let Some(service) = event.data.get("service").and_then(Value::as_str) else {
                    warn!("remote call_service without service");
                    return;
                };
                let data = event
                    .data
                    .get("data")
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                let namespace = self.resolve_target(&target);
                let result = self
                    .registry
                    .call_service(Some(&namespace), domain, service, data)
                    .await;
                (result, "call_service_response")
            }
            _ => {
                self.reinject_event(&target, event).await;
                return;
            }
        };

        // Respond only when there is something to say.
        let Some(result) = result else { return };
        let response_id = event
            .request_id
            .clone()
            .unwrap_or_else(|| RequestId::new().into_inner());
        let address = format!(
            "{}_{}",
            self.client_id,
            target.name().unwrap_or_default()
        );
        let body = json!({
            "response": result,
            "response_type": response_type,
            "response_id": response_id,
        });
        if let Err(err) = self.fire_event(response_type, &address, body).await {
            debug!(error = %err, "response not delivered");
        }
    }

    /// Bind a service the remote side just announced, routed back through
    /// this session when called locally.
    fn register_remote_service(self: &Arc<Self>, target: &LocalTarget, data: &Value) {
        let (Some(domain), Some(service)) = (
            data.get("domain").and_then(Value::as_str),
            data.get("service").and_then(Value::as_str),
        ) else {
            warn!(?data, "malformed service_registered event");
            return;
        };

        let namespace = self.resolve_target(target);
        debug!(%namespace, %domain, %service, "registering remote service");
        self.registry.register_service(
            &self.name,
            &namespace,
            domain,
            service,
            self.service_handler(),
        );
    }

    /// The local services visible to a remote `get_services` query: for a
    /// named target only that namespace; for the unqualified default,
    /// everything that is not itself a bridged-in namespace.
    fn list_matching_services(&self, target: &LocalTarget) -> Vec<ServiceDesc> {
        self.registry
            .list_services()
            .into_iter()
            .filter(|desc| match target.name() {
                Some(local) => desc.namespace == local,
                None => !self.map.contains_local(&desc.namespace),
            })
            .collect()
    }

    /// Push an uninterpreted remote event into the local bus, tagged with
    /// this bridge's origin so it is never forwarded back.
    async fn reinject_event(&self, target: &LocalTarget, mut event: RemoteEvent) {
        if let Some(obj) = event.data.as_object_mut() {
            let _ = obj.insert(ORIGIN_KEY.to_string(), json!(self.client_id.as_str()));
        }
        let namespace = self.resolve_target(target);
        match serde_json::to_value(&event) {
            Ok(payload) => self.bus.process_event(&namespace, payload).await,
            Err(err) => warn!(error = %err, "could not re-inject remote event"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Handlers handed to the host collaborators
    // ─────────────────────────────────────────────────────────────────────

    /// Service handler bound to this session. Holds a weak reference so a
    /// stale registration cannot keep a dead session alive.
    pub(crate) fn service_handler(self: &Arc<Self>) -> ServiceHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move |call: ServiceCall| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(this) = weak.upgrade() else { return None };
                this.handle_service_call(call).await
            })
        })
    }

    /// Route a host-side service invocation through this session.
    async fn handle_service_call(self: &Arc<Self>, call: ServiceCall) -> Option<Value> {
        let namespace = call
            .namespace
            .unwrap_or_else(|| self.settings.namespace.clone());
        match self
            .call_service(&namespace, &call.domain, &call.service, call.data)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, domain = %call.domain, service = %call.service, "service call failed");
                None
            }
        }
    }

    /// Event-bus callback that forwards admitted local events to the remote
    /// side.
    pub(crate) fn forward_handler(self: &Arc<Self>) -> EventHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move |event: String, data: Value, namespace: String| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(this) = weak.upgrade() else { return };
                this.forward_event(&event, data, &namespace).await;
            })
        })
    }

    /// Forward one local event, re-addressed under this bridge's client
    /// prefix. Events the bridge itself injected are dropped here.
    async fn forward_event(&self, event: &str, data: Value, namespace: &str) {
        if data.get(ORIGIN_KEY).and_then(Value::as_str) == Some(self.client_id.as_str()) {
            return;
        }
        let Some(rule) = &self.settings.forward_namespaces else {
            return;
        };
        if !rule.should_forward(namespace, &self.map) {
            return;
        }

        let readdressed = format!("{}_{namespace}", self.client_id);
        if let Err(err) = self.fire_event(event, &readdressed, data).await {
            debug!(error = %err, %event, "event not forwarded");
        }
    }
}

/// Map a pseudo-service `type` field to the matching request type.
fn subscription_kind(data: &Value, cancel: bool) -> Option<RequestType> {
    match data.get("type").and_then(Value::as_str)? {
        "state" if cancel => Some(RequestType::CancelListenState),
        "state" => Some(RequestType::ListenState),
        "event" if cancel => Some(RequestType::CancelListenEvent),
        "event" => Some(RequestType::ListenEvent),
        _ => None,
    }
}

/// Accept `bytes_data` either as a string or as an array of byte values.
fn extract_bytes(value: Option<&Value>) -> Option<Vec<u8>> {
    match value? {
        Value::String(s) => Some(s.clone().into_bytes()),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect(),
        _ => None,
    }
}
