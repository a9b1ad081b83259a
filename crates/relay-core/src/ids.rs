//! Branded ID newtypes for type safety.
//!
//! The bridge addresses everything by string identifiers on the wire; these
//! newtypes keep a request id from being passed where a client id is
//! expected. Both are UUID v4 rendered as 32 lowercase hex characters,
//! matching the wire format the remote side expects.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new UUID v4 as bare hex (no hyphens).
fn new_hex() -> String {
    Uuid::new_v4().simple().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v4 hex).
            #[must_use]
            pub fn new() -> Self {
                Self(new_hex())
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

branded_id! {
    /// Stable identifier for this bridge instance, used as the namespace
    /// prefix for remote-addressed traffic. Either configured or derived as
    /// `"<name_lowercase>_<uuid4hex>"`, and held for the process lifetime.
    ClientId
}

branded_id! {
    /// Correlation identifier for one outbound request expecting a response.
    RequestId
}

impl ClientId {
    /// Derive a client id from the bridge's configured name.
    #[must_use]
    pub fn derive(name: &str) -> Self {
        Self(format!("{}_{}", name.to_lowercase(), new_hex()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique_hex() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn client_id_derive_lowercases_name() {
        let id = ClientId::derive("Upstairs");
        assert!(id.as_str().starts_with("upstairs_"));
    }

    #[test]
    fn client_id_serde_transparent() {
        let id = ClientId::from("bridge_abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"bridge_abc\"");
    }
}
