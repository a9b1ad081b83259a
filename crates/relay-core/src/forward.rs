//! Event-forwarding admission policy.
//!
//! Decides, per locally observed event, whether to relay it to the remote
//! side. Pure function of the event's originating namespace and the
//! configured rule; no dynamic state. Loop prevention (dropping events
//! already tagged with this bridge's origin) happens before the policy is
//! consulted, in the session's forwarding callback.

use serde::{Deserialize, Serialize};

use crate::namespace::{NamespaceMap, match_wildcard};

/// Configured forwarding rule: two namespace pattern lists, each entry exact
/// or trailing-wildcard (`"prefix*"`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ForwardingRule {
    /// Namespaces never forwarded.
    #[serde(default)]
    pub restricted_namespaces: Vec<String>,
    /// When non-empty, only these namespaces are forwarded.
    #[serde(default)]
    pub non_restricted_namespaces: Vec<String>,
}

impl ForwardingRule {
    /// Whether an event originating in `namespace` should cross the bridge.
    ///
    /// Rejected when:
    /// - the namespace is one this bridge created by translating inbound
    ///   traffic (a local value in the remote map), or
    /// - a non-empty restricted list matches it, or
    /// - a non-empty non-restricted list does not match it.
    #[must_use]
    pub fn should_forward(&self, namespace: &str, map: &NamespaceMap) -> bool {
        if map.contains_local(namespace) {
            return false;
        }
        if !self.restricted_namespaces.is_empty()
            && match_wildcard(namespace, &self.restricted_namespaces)
        {
            return false;
        }
        if !self.non_restricted_namespaces.is_empty()
            && !match_wildcard(namespace, &self.non_restricted_namespaces)
        {
            return false;
        }
        true
    }
}
