//! Namespace translation between the local and remote identifier spaces.
//!
//! The bridge is configured with an ordered set of `(local, remote)`
//! namespace pairs, unique on both sides. Inbound traffic is accepted when
//! its namespace is either a mapped remote key or addressed to this bridge
//! via the client-identifier prefix (`"<clientId>_<local>"`). The prefix and
//! the `_` separator are part of the wire contract, so the parsing rules
//! live here rather than as scattered string checks.

use std::collections::HashMap;

use indexmap::IndexMap;
use thiserror::Error;

use crate::constants::NAMESPACE_SEPARATOR;
use crate::ids::ClientId;

/// Error building a [`NamespaceMap`] from configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamespaceMapError {
    /// No pairs were configured.
    #[error("remote namespace mapping is empty")]
    Empty,
    /// A local namespace appeared more than once.
    #[error("duplicate local namespace: {0}")]
    DuplicateLocal(String),
    /// A remote namespace appeared more than once.
    #[error("duplicate remote namespace: {0}")]
    DuplicateRemote(String),
}

/// Where an accepted inbound namespace lands locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalTarget {
    /// The bridge's own unqualified namespace.
    Default,
    /// A named local namespace.
    Named(String),
}

impl LocalTarget {
    /// The namespace name, or `None` for the unqualified default.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::Named(name) => Some(name),
        }
    }
}

/// Bidirectional local/remote namespace mapping, fixed at construction.
///
/// Lookups are O(1) in both directions; iteration preserves configuration
/// order.
#[derive(Clone, Debug)]
pub struct NamespaceMap {
    /// local → remote, in configuration order.
    forward: IndexMap<String, String>,
    /// remote → local.
    reverse: HashMap<String, String>,
}

impl NamespaceMap {
    /// Build the map from `(local, remote)` pairs.
    pub fn new<I>(pairs: I) -> Result<Self, NamespaceMapError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut forward = IndexMap::new();
        let mut reverse = HashMap::new();

        for (local, remote) in pairs {
            if forward.contains_key(&local) {
                return Err(NamespaceMapError::DuplicateLocal(local));
            }
            if reverse.contains_key(&remote) {
                return Err(NamespaceMapError::DuplicateRemote(remote));
            }
            let _ = forward.insert(local.clone(), remote.clone());
            let _ = reverse.insert(remote, local);
        }

        if forward.is_empty() {
            return Err(NamespaceMapError::Empty);
        }

        Ok(Self { forward, reverse })
    }

    /// Number of configured pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the map has no pairs (never true for a constructed map).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Local namespaces in configuration order.
    pub fn local_namespaces(&self) -> impl Iterator<Item = &str> {
        self.forward.keys().map(String::as_str)
    }

    /// Remote namespaces in configuration order.
    pub fn remote_namespaces(&self) -> impl Iterator<Item = &str> {
        self.forward.values().map(String::as_str)
    }

    /// Whether `namespace` is a configured local namespace.
    #[must_use]
    pub fn contains_local(&self, namespace: &str) -> bool {
        self.forward.contains_key(namespace)
    }

    /// Whether `namespace` is a configured remote namespace.
    #[must_use]
    pub fn contains_remote(&self, namespace: &str) -> bool {
        self.reverse.contains_key(namespace)
    }

    /// Direct forward lookup (local → remote).
    #[must_use]
    pub fn to_remote(&self, local: &str) -> Option<&str> {
        self.forward.get(local).map(String::as_str)
    }

    /// Direct reverse lookup (remote → local).
    #[must_use]
    pub fn to_local(&self, remote: &str) -> Option<&str> {
        self.reverse.get(remote).map(String::as_str)
    }

    /// Translate an inbound remote namespace.
    ///
    /// Returns `None` when the namespace is rejected. Accepted cases:
    ///
    /// - a configured remote key maps to its local namespace
    /// - exactly the client identifier targets the unqualified local
    ///   namespace ([`LocalTarget::Default`])
    /// - `"<clientId>_<name>"` targets the local namespace `<name>`
    ///
    /// A bare trailing separator (`"<clientId>_"`) is malformed and
    /// rejected, as is a client-prefixed namespace missing the separator.
    #[must_use]
    pub fn translate_inbound(&self, client: &ClientId, remote: &str) -> Option<LocalTarget> {
        if let Some(local) = self.to_local(remote) {
            return Some(LocalTarget::Named(local.to_string()));
        }

        let rest = remote.strip_prefix(client.as_str())?;
        if rest.is_empty() {
            return Some(LocalTarget::Default);
        }

        match rest.strip_prefix(NAMESPACE_SEPARATOR) {
            Some("") | None => None,
            Some(name) => Some(LocalTarget::Named(name.to_string())),
        }
    }

    /// Translate an outbound local namespace to its remote counterpart.
    ///
    /// A namespace already carrying the client-identifier prefix is
    /// remote-addressed and passes through unchanged. Otherwise an unmapped
    /// namespace is rejected (`None`); the caller logs and no-ops.
    #[must_use]
    pub fn translate_outbound(&self, client: &ClientId, local: &str) -> Option<String> {
        let prefix = format!("{}{}", client.as_str(), NAMESPACE_SEPARATOR);
        if local.starts_with(&prefix) {
            return Some(local.to_string());
        }
        self.to_remote(local).map(ToString::to_string)
    }
}

/// Wildcard admission check against a pattern set.
///
/// A pattern `"X*"` matches any namespace with prefix `X`; every other
/// pattern requires exact equality.
#[must_use]
pub fn match_wildcard<S: AsRef<str>>(namespace: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|pattern| {
        let pattern = pattern.as_ref();
        match pattern.strip_suffix('*') {
            Some(prefix) => namespace.starts_with(prefix),
            None => namespace == pattern,
        }
    })
}
