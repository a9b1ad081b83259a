//! In-memory collaborator implementations.
//!
//! Suitable for standalone operation of the binary and as fakes in tests.
//! All state lives behind `parking_lot` locks; none of these block on I/O.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use crate::traits::{
    EventBus, EventHandler, NamespaceInfo, PluginLifecycle, ServiceCall, ServiceDesc,
    ServiceHandler, ServiceRegistry, StateStore,
};

// ─────────────────────────────────────────────────────────────────────────────
// Service registry
// ─────────────────────────────────────────────────────────────────────────────

struct Registration {
    owner: String,
    handler: ServiceHandler,
}

/// In-memory [`ServiceRegistry`] keyed by (namespace, domain, service).
#[derive(Default)]
pub struct MemoryServiceRegistry {
    services: RwLock<HashMap<(String, String, String), Registration>>,
}

impl MemoryServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

#[async_trait]
impl ServiceRegistry for MemoryServiceRegistry {
    fn register_service(
        &self,
        owner: &str,
        namespace: &str,
        domain: &str,
        service: &str,
        handler: ServiceHandler,
    ) {
        let key = (
            namespace.to_string(),
            domain.to_string(),
            service.to_string(),
        );
        let _ = self.services.write().insert(
            key,
            Registration {
                owner: owner.to_string(),
                handler,
            },
        );
    }

    async fn call_service(
        &self,
        namespace: Option<&str>,
        domain: &str,
        service: &str,
        data: Value,
    ) -> Option<Value> {
        let namespace = namespace?;
        let handler = {
            let services = self.services.read();
            let key = (
                namespace.to_string(),
                domain.to_string(),
                service.to_string(),
            );
            services.get(&key).map(|reg| reg.handler.clone())
        }?;
        handler(ServiceCall {
            namespace: Some(namespace.to_string()),
            domain: domain.to_string(),
            service: service.to_string(),
            data,
        })
        .await
    }

    fn list_services(&self) -> Vec<ServiceDesc> {
        self.services
            .read()
            .keys()
            .map(|(namespace, domain, service)| ServiceDesc {
                namespace: namespace.clone(),
                domain: domain.clone(),
                service: service.clone(),
            })
            .collect()
    }

    fn clear_services(&self, owner: &str) {
        self.services.write().retain(|_, reg| reg.owner != owner);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event bus
// ─────────────────────────────────────────────────────────────────────────────

struct Callback {
    owner: String,
    namespace: String,
    handler: EventHandler,
}

/// Whether a callback registered under `pattern` receives events in
/// `namespace`. `"*"` matches everything, a trailing `*` matches by prefix,
/// anything else requires equality.
fn namespace_matches(pattern: &str, namespace: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => namespace.starts_with(prefix),
        None => namespace == pattern,
    }
}

/// In-memory [`EventBus`] with wildcard-aware namespace filtering.
#[derive(Default)]
pub struct MemoryEventBus {
    callbacks: RwLock<Vec<Callback>>,
}

impl MemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.read().len()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn add_callback(&self, owner: &str, namespace: &str, handler: EventHandler) {
        self.callbacks.write().push(Callback {
            owner: owner.to_string(),
            namespace: namespace.to_string(),
            handler,
        });
    }

    async fn clear_callbacks(&self, owner: &str) {
        self.callbacks.write().retain(|cb| cb.owner != owner);
    }

    async fn process_event(&self, namespace: &str, payload: Value) {
        let event_type = payload
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let data = payload.get("data").cloned().unwrap_or(Value::Null);

        let matching: Vec<EventHandler> = {
            let callbacks = self.callbacks.read();
            callbacks
                .iter()
                .filter(|cb| namespace_matches(&cb.namespace, namespace))
                .map(|cb| cb.handler.clone())
                .collect()
        };

        for handler in matching {
            handler(event_type.clone(), data.clone(), namespace.to_string()).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory [`StateStore`]: namespace → entity id → value.
#[derive(Default)]
pub struct MemoryStateStore {
    state: RwLock<HashMap<String, Map<String, Value>>>,
}

impl MemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one entity's value.
    pub fn set_entity(&self, namespace: &str, entity_id: &str, value: Value) {
        let mut state = self.state.write();
        let _ = state
            .entry(namespace.to_string())
            .or_default()
            .insert(entity_id.to_string(), value);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_entity(&self, namespace: Option<&str>, entity_id: Option<&str>) -> Value {
        let state = self.state.read();
        match namespace {
            None => {
                let all: Map<String, Value> = state
                    .iter()
                    .map(|(ns, entities)| (ns.clone(), Value::Object(entities.clone())))
                    .collect();
                Value::Object(all)
            }
            Some(ns) => match state.get(ns) {
                None => Value::Null,
                Some(entities) => match entity_id {
                    None => Value::Object(entities.clone()),
                    Some(id) => entities.get(id).cloned().unwrap_or(Value::Null),
                },
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// One recorded `notify_started` call.
#[derive(Clone, Debug)]
pub struct StartedNotification {
    /// Bridge name.
    pub name: String,
    /// Namespace summary.
    pub namespace_info: NamespaceInfo,
    /// Reported metadata.
    pub metadata: Value,
    /// Combined state snapshot.
    pub state_snapshot: Value,
    /// Whether this was the first successful connection.
    pub first_time: bool,
}

/// Recording [`PluginLifecycle`]: stores every notification for inspection.
#[derive(Default)]
pub struct MemoryLifecycle {
    started: Mutex<Vec<StartedNotification>>,
    stopped: Mutex<Vec<(String, String)>>,
}

impl MemoryLifecycle {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded `notify_started` calls, in order.
    #[must_use]
    pub fn started(&self) -> Vec<StartedNotification> {
        self.started.lock().clone()
    }

    /// All recorded `notify_stopped` calls, in order.
    #[must_use]
    pub fn stopped(&self) -> Vec<(String, String)> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl PluginLifecycle for MemoryLifecycle {
    async fn notify_started(
        &self,
        name: &str,
        namespace_info: NamespaceInfo,
        metadata: Value,
        state_snapshot: Value,
        first_time: bool,
    ) {
        self.started.lock().push(StartedNotification {
            name: name.to_string(),
            namespace_info,
            metadata,
            state_snapshot,
            first_time,
        });
    }

    async fn notify_stopped(&self, name: &str, namespace: &str) {
        self.stopped
            .lock()
            .push((name.to_string(), namespace.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn noop_service() -> ServiceHandler {
        Arc::new(|_call| Box::pin(async { Some(json!("ok")) }))
    }

    #[tokio::test]
    async fn registry_register_call_round_trip() {
        let registry = MemoryServiceRegistry::new();
        registry.register_service("bridge", "roomA", "light", "turn_on", noop_service());

        let res = registry
            .call_service(Some("roomA"), "light", "turn_on", json!({}))
            .await;
        assert_eq!(res, Some(json!("ok")));

        let missing = registry
            .call_service(Some("roomA"), "light", "turn_off", json!({}))
            .await;
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn registry_registration_is_idempotent_by_triple() {
        let registry = MemoryServiceRegistry::new();
        registry.register_service("bridge", "roomA", "light", "turn_on", noop_service());
        registry.register_service("bridge", "roomA", "light", "turn_on", noop_service());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn registry_clear_by_owner_only() {
        let registry = MemoryServiceRegistry::new();
        registry.register_service("bridge", "roomA", "light", "turn_on", noop_service());
        registry.register_service("other", "roomB", "fan", "toggle", noop_service());

        registry.clear_services("bridge");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_services()[0].namespace, "roomB");
    }

    #[tokio::test]
    async fn bus_filters_by_namespace() {
        let bus = MemoryEventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        bus.add_callback(
            "bridge",
            "kitchen",
            Arc::new(move |_event, _data, _ns| {
                let hits = hits_cb.clone();
                Box::pin(async move {
                    let _ = hits.fetch_add(1, Ordering::SeqCst);
                })
            }),
        )
        .await;

        bus.process_event("kitchen", json!({"event_type": "motion", "data": {}}))
            .await;
        bus.process_event("garage", json!({"event_type": "motion", "data": {}}))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bus_wildcard_namespaces() {
        let bus = MemoryEventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_all = hits.clone();
        bus.add_callback(
            "bridge",
            "*",
            Arc::new(move |_event, _data, _ns| {
                let hits = hits_all.clone();
                Box::pin(async move {
                    let _ = hits.fetch_add(1, Ordering::SeqCst);
                })
            }),
        )
        .await;

        let hits_prefix = hits.clone();
        bus.add_callback(
            "bridge",
            "garage*",
            Arc::new(move |_event, _data, _ns| {
                let hits = hits_prefix.clone();
                Box::pin(async move {
                    let _ = hits.fetch_add(10, Ordering::SeqCst);
                })
            }),
        )
        .await;

        bus.process_event("garage_door", json!({"event_type": "open", "data": {}}))
            .await;
        bus.process_event("kitchen", json!({"event_type": "motion", "data": {}}))
            .await;
        // "*" fires twice, "garage*" once.
        assert_eq!(hits.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn bus_clear_callbacks_by_owner() {
        let bus = MemoryEventBus::new();
        bus.add_callback("bridge", "kitchen", Arc::new(|_, _, _| Box::pin(async {})))
            .await;
        bus.add_callback("other", "kitchen", Arc::new(|_, _, _| Box::pin(async {})))
            .await;

        bus.clear_callbacks("bridge").await;
        assert_eq!(bus.callback_count(), 1);
    }

    #[tokio::test]
    async fn store_lookup_levels() {
        let store = MemoryStateStore::new();
        store.set_entity("roomA", "light.hall", json!({"state": "on"}));

        let one = store.get_entity(Some("roomA"), Some("light.hall")).await;
        assert_eq!(one["state"], "on");

        let ns = store.get_entity(Some("roomA"), None).await;
        assert!(ns.get("light.hall").is_some());

        let all = store.get_entity(None, None).await;
        assert!(all.get("roomA").is_some());

        let missing = store.get_entity(Some("nowhere"), None).await;
        assert!(missing.is_null());
    }

    #[tokio::test]
    async fn lifecycle_records_notifications() {
        let lifecycle = MemoryLifecycle::new();
        lifecycle
            .notify_started(
                "bridge",
                NamespaceInfo {
                    namespace: "default".into(),
                    namespaces: vec!["default".into()],
                },
                json!({"version": "1.0"}),
                json!({}),
                true,
            )
            .await;
        lifecycle.notify_stopped("bridge", "default").await;

        assert_eq!(lifecycle.started().len(), 1);
        assert!(lifecycle.started()[0].first_time);
        assert_eq!(lifecycle.stopped(), vec![("bridge".into(), "default".into())]);
    }
}
