//! # relay-host
//!
//! The narrow contracts the bridge consumes from its host automation engine,
//! plus in-memory implementations.
//!
//! The bridge never talks to a concrete engine directly; it is constructed
//! with these four collaborators:
//!
//! - [`ServiceRegistry`] — register / call / list services
//! - [`EventBus`] — namespace-filtered callbacks and event injection
//! - [`StateStore`] — entity reads
//! - [`PluginLifecycle`] — started/stopped notifications
//!
//! The `Memory*` implementations back both standalone operation and tests.

#![deny(unsafe_code)]

pub mod memory;
pub mod traits;

pub use memory::{MemoryEventBus, MemoryLifecycle, MemoryServiceRegistry, MemoryStateStore};
pub use traits::{
    EventBus, EventHandler, NamespaceInfo, PluginLifecycle, ServiceCall, ServiceDesc,
    ServiceHandler, ServiceRegistry, StateStore,
};
