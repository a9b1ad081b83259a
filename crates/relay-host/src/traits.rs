//! Host-collaborator contracts.
//!
//! These traits are the bridge's only view of the host automation engine.
//! Keeping them narrow lets tests substitute the in-memory fakes and lets
//! embedders adapt whatever registry/bus/store they already run.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Service registry
// ─────────────────────────────────────────────────────────────────────────────

/// One service invocation as seen by a registered handler.
#[derive(Clone, Debug)]
pub struct ServiceCall {
    /// Target namespace; `None` addresses the unqualified default.
    pub namespace: Option<String>,
    /// Service domain.
    pub domain: String,
    /// Service name.
    pub service: String,
    /// Call payload.
    pub data: Value,
}

/// Handler invoked when a registered service is called.
pub type ServiceHandler =
    Arc<dyn Fn(ServiceCall) -> BoxFuture<'static, Option<Value>> + Send + Sync>;

/// A (namespace, domain, service) triple known to the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDesc {
    /// Owning namespace.
    pub namespace: String,
    /// Service domain.
    pub domain: String,
    /// Service name.
    pub service: String,
}

/// The host's service registry.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Register (or idempotently replace) a service handler.
    ///
    /// `owner` tags the registration so [`clear_services`] can prune
    /// everything one bridge instance created.
    ///
    /// [`clear_services`]: ServiceRegistry::clear_services
    fn register_service(
        &self,
        owner: &str,
        namespace: &str,
        domain: &str,
        service: &str,
        handler: ServiceHandler,
    );

    /// Invoke a registered service; `None` when no handler matched or the
    /// handler produced no result.
    async fn call_service(
        &self,
        namespace: Option<&str>,
        domain: &str,
        service: &str,
        data: Value,
    ) -> Option<Value>;

    /// All known services.
    fn list_services(&self) -> Vec<ServiceDesc>;

    /// Remove every registration tagged with `owner`.
    fn clear_services(&self, owner: &str);
}

// ─────────────────────────────────────────────────────────────────────────────
// Event bus
// ─────────────────────────────────────────────────────────────────────────────

/// Callback invoked for each event in a subscribed namespace, with
/// `(event_type, data, namespace)`.
pub type EventHandler =
    Arc<dyn Fn(String, Value, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// The host's event bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Register a callback for events in `namespace`, tagged with `owner`.
    async fn add_callback(&self, owner: &str, namespace: &str, handler: EventHandler);

    /// Remove every callback tagged with `owner`.
    async fn clear_callbacks(&self, owner: &str);

    /// Inject an event into the bus. `payload` is the wire shape
    /// `{event_type, data, ...}`.
    async fn process_event(&self, namespace: &str, payload: Value);
}

// ─────────────────────────────────────────────────────────────────────────────
// State store
// ─────────────────────────────────────────────────────────────────────────────

/// The host's entity/state store.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read one entity, one namespace (`entity_id == None`), or everything
    /// (`namespace == None`). Absent targets yield `Value::Null`.
    async fn get_entity(&self, namespace: Option<&str>, entity_id: Option<&str>) -> Value;
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Namespace summary passed to the lifecycle collaborator on start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    /// The bridge's own namespace.
    pub namespace: String,
    /// Every namespace the bridge serves, own namespace included.
    pub namespaces: Vec<String>,
}

/// Host notifications about bridge availability.
#[async_trait]
pub trait PluginLifecycle: Send + Sync {
    /// The bridge finished a sync and is streaming. `first_time` is true
    /// only for the first successful connection of the process.
    async fn notify_started(
        &self,
        name: &str,
        namespace_info: NamespaceInfo,
        metadata: Value,
        state_snapshot: Value,
        first_time: bool,
    );

    /// The bridge lost its connection (fired once per failure episode).
    async fn notify_stopped(&self, name: &str, namespace: &str);
}
