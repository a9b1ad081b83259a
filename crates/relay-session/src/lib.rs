//! # relay-session
//!
//! The bridge's connection engine: one persistent socket to a remote
//! automation instance, multiplexing state sync, event traffic, and service
//! calls in both directions.
//!
//! - [`Session`] drives the connect / authenticate / sync / stream /
//!   reconnect lifecycle against injected host collaborators
//! - [`transport`] is the connection seam; [`ws::WsConnector`] is the real
//!   implementation (TLS, proxy, scheme upgrade included)
//! - [`correlation`] pairs outbound request ids with their replies

#![deny(unsafe_code)]

pub mod correlation;
mod dispatcher;
mod session;
pub mod transport;
pub mod ws;

pub use correlation::CorrelationTable;
pub use session::Session;
pub use transport::{Connector, TransportMessage, TransportSink, TransportStream};
pub use ws::WsConnector;
