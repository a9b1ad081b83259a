//! # relay-core
//!
//! Foundation types for the Relay bridge.
//!
//! This crate provides the shared vocabulary the other Relay crates depend on:
//!
//! - **Branded IDs**: `ClientId`, `RequestId` as newtypes for type safety
//! - **Namespace translation**: `NamespaceMap` with the inbound/outbound
//!   mapping rules and wildcard matching
//! - **Forwarding policy**: pure admission rules for relaying local events
//! - **Errors**: `BridgeError` hierarchy via `thiserror`

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod forward;
pub mod ids;
pub mod namespace;

pub use errors::{BridgeError, TransportError};
pub use forward::ForwardingRule;
pub use ids::{ClientId, RequestId};
pub use namespace::{LocalTarget, NamespaceMap, match_wildcard};
