//! # relay-settings
//!
//! Configuration surface for the Relay bridge.
//!
//! Settings come from a JSON file deep-merged over compiled defaults, with
//! environment variable overrides applied last. Construction-time
//! validation enforces the two hard requirements: a remote URL and a
//! non-empty namespace mapping. Everything else has a sensible default.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings_from_path, settings_path};
pub use types::{BridgeSettings, Subscriptions, TlsVersion};
