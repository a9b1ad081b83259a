//! # relay-protocol
//!
//! Wire-format types for the Relay bridge protocol.
//!
//! Everything on the wire is a JSON text frame in one of three shapes:
//!
//! - **Request** envelope: `{request_type, request_id?, data}`
//! - **Reply** envelope: `{response_type?, response_id?, response_success?,
//!   response_error?, data}`
//! - **Event** envelope: a reply whose `response_type` is `event` or
//!   `state_changed`, carrying `data.namespace` plus the event payload
//!
//! [`Inbound::classify`] sorts received frames into events versus correlated
//! replies.

#![deny(unsafe_code)]

pub mod inbound;
pub mod types;

pub use inbound::Inbound;
pub use types::{Reply, RemoteEvent, Request, RequestType};
