//! Request and reply envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use relay_core::RequestId;

/// Recognized request kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Authentication handshake, first message on every connection.
    Hello,
    /// Fetch complete state for one namespace.
    GetState,
    /// Fetch the remote service catalog.
    GetServices,
    /// Invoke a remote service.
    CallService,
    /// Subscribe to remote state changes.
    ListenState,
    /// Subscribe to remote events.
    ListenEvent,
    /// Cancel a state subscription by handle.
    CancelListenState,
    /// Cancel an event subscription by handle.
    CancelListenEvent,
    /// Inject an event on the remote side (fire-and-forget).
    FireEvent,
}

impl RequestType {
    /// Wire name of the request type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::GetState => "get_state",
            Self::GetServices => "get_services",
            Self::CallService => "call_service",
            Self::ListenState => "listen_state",
            Self::ListenEvent => "listen_event",
            Self::CancelListenState => "cancel_listen_state",
            Self::CancelListenEvent => "cancel_listen_event",
            Self::FireEvent => "fire_event",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound request envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    /// Request kind.
    pub request_type: RequestType,
    /// Correlation id, present when a response is expected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Request payload.
    pub data: Value,
}

impl Request {
    /// Build a `hello` authentication request.
    #[must_use]
    pub fn hello(request_id: RequestId, client_name: &str, password: Option<&str>) -> Self {
        Self {
            request_type: RequestType::Hello,
            request_id: Some(request_id),
            data: json!({ "client_name": client_name, "password": password }),
        }
    }

    /// Build a `get_state` request for one remote namespace.
    #[must_use]
    pub fn get_state(request_id: RequestId, namespace: &str) -> Self {
        Self {
            request_type: RequestType::GetState,
            request_id: Some(request_id),
            data: json!({ "namespace": namespace }),
        }
    }

    /// Build a `get_services` catalog request.
    #[must_use]
    pub fn get_services(request_id: RequestId) -> Self {
        Self {
            request_type: RequestType::GetServices,
            request_id: Some(request_id),
            data: Value::Object(Map::new()),
        }
    }

    /// Build a `call_service` request against a remote namespace.
    #[must_use]
    pub fn call_service(
        request_id: RequestId,
        namespace: &str,
        domain: &str,
        service: &str,
        data: Value,
    ) -> Self {
        Self {
            request_type: RequestType::CallService,
            request_id: Some(request_id),
            data: json!({
                "namespace": namespace,
                "domain": domain,
                "service": service,
                "data": data,
            }),
        }
    }

    /// Build a subscription request (`listen_state` / `listen_event`).
    #[must_use]
    pub fn listen(request_id: RequestId, request_type: RequestType, subscription: Value) -> Self {
        Self {
            request_type,
            request_id: Some(request_id),
            data: subscription,
        }
    }

    /// Build a subscription cancel request for a previously returned handle.
    #[must_use]
    pub fn cancel_listen(
        request_id: RequestId,
        request_type: RequestType,
        handle: Value,
    ) -> Self {
        Self {
            request_type,
            request_id: Some(request_id),
            data: json!({ "handle": handle }),
        }
    }

    /// Build a fire-and-forget `fire_event` request.
    #[must_use]
    pub fn fire_event(namespace: &str, event: &str, data: Value) -> Self {
        Self {
            request_type: RequestType::FireEvent,
            request_id: None,
            data: json!({ "namespace": namespace, "event": event, "data": data }),
        }
    }

    /// Serialize to a wire text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound reply envelope.
///
/// Every field except `data` is optional on the wire; events carry
/// `response_type` but no `response_id`, correlated replies the reverse.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Reply {
    /// Reply kind (`event`, `state_changed`, `get_state_response`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    /// Echo of the request id this reply answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Whether the request succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_success: Option<bool>,
    /// Error detail when `response_success == false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_error: Option<String>,
    /// Reply payload.
    #[serde(default)]
    pub data: Value,
    /// Echo of the failed request, when the remote side includes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
}

impl Reply {
    /// Whether the remote side marked this reply successful.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.response_success == Some(true)
    }
}

/// The payload of an inbound `event` / `state_changed` frame, after the
/// namespace has been split off.
///
/// `extra` retains any fields this bridge does not interpret, so a payload
/// re-injected into the local event bus survives round-tripping intact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteEvent {
    /// Event kind (`service_registered`, `get_state`, `call_service`, ...).
    pub event_type: String,
    /// Event data.
    #[serde(default)]
    pub data: Value,
    /// Correlation id for request-style events expecting a response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Uninterpreted fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteEvent {
    /// The origin tag inside `data`, if any.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.data.get(relay_core::constants::ORIGIN_KEY)?.as_str()
    }
}
