//! Settings types with serde defaults.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::ForwardingRule;

use crate::errors::{Result, SettingsError};

/// Default reconnect backoff and request timeout, in milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 5000;
/// Default settle delay before issuing static subscriptions.
pub const DEFAULT_SUBSCRIPTION_DELAY_MS: u64 = 1000;

/// Minimum TLS protocol version for the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    /// TLS 1.0.
    #[serde(rename = "1.0")]
    V1_0,
    /// TLS 1.1.
    #[serde(rename = "1.1")]
    V1_1,
    /// TLS 1.2.
    #[serde(rename = "1.2")]
    V1_2,
    /// Let the TLS library negotiate.
    #[default]
    #[serde(rename = "auto")]
    Auto,
}

/// Static subscriptions issued after every successful sync.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Subscriptions {
    /// State subscriptions, each an opaque payload for `listen_state`.
    #[serde(default)]
    pub state: Vec<Value>,
    /// Event subscriptions, each an opaque payload for `listen_event`.
    #[serde(default)]
    pub event: Vec<Value>,
}

/// Complete configuration for one bridge instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// The bridge's own local namespace.
    pub namespace: String,
    /// Base URL of the remote instance (`http(s)://...`; scheme is upgraded
    /// to the socket equivalent). Required.
    pub ad_url: String,
    /// Shared secret sent in the `hello` request.
    pub api_key: Option<String>,
    /// Stable client display name; derived from the bridge name when unset.
    pub client_name: Option<String>,
    /// Socket timeout in seconds, passed through to the transport.
    pub timeout: Option<u64>,
    /// Whether to verify the remote certificate.
    pub cert_verify: bool,
    /// CA bundle file.
    pub ca_certs: Option<PathBuf>,
    /// CA certificate directory.
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate file.
    pub ssl_certificate: Option<PathBuf>,
    /// Client private key file.
    pub ssl_key: Option<PathBuf>,
    /// Whether to check the remote hostname against its certificate.
    pub check_hostname: bool,
    /// Minimum TLS protocol version.
    pub tls_version: TlsVersion,
    /// Outbound HTTP proxy host.
    pub http_proxy_host: Option<String>,
    /// Outbound HTTP proxy port.
    pub http_proxy_port: Option<u16>,
    /// Local → remote namespace mapping. Required, non-empty, order kept.
    pub remote_namespaces: IndexMap<String, String>,
    /// Static subscriptions issued after sync.
    pub subscriptions: Option<Subscriptions>,
    /// Local-to-remote event forwarding rule; forwarding is disabled when
    /// unset.
    pub forward_namespaces: Option<ForwardingRule>,
    /// How long a correlated request waits for its response.
    pub request_timeout_ms: u64,
    /// Backoff between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Settle delay before each static subscription is submitted.
    pub subscription_delay_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            ad_url: String::new(),
            api_key: None,
            client_name: None,
            timeout: None,
            cert_verify: true,
            ca_certs: None,
            ca_cert_path: None,
            ssl_certificate: None,
            ssl_key: None,
            check_hostname: true,
            tls_version: TlsVersion::Auto,
            http_proxy_host: None,
            http_proxy_port: None,
            remote_namespaces: IndexMap::new(),
            subscriptions: None,
            forward_namespaces: None,
            request_timeout_ms: DEFAULT_DELAY_MS,
            reconnect_delay_ms: DEFAULT_DELAY_MS,
            subscription_delay_ms: DEFAULT_SUBSCRIPTION_DELAY_MS,
        }
    }
}

impl BridgeSettings {
    /// Check the hard construction-time requirements.
    pub fn validate(&self) -> Result<()> {
        if self.ad_url.is_empty() {
            return Err(SettingsError::MissingUrl);
        }
        if self.remote_namespaces.is_empty() {
            return Err(SettingsError::EmptyNamespaceMap);
        }
        if self.request_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
