//! Package-level constants and wire-contract literals.

/// Current version of the Relay bridge (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Metadata version reported to the host lifecycle collaborator.
pub const METADATA_VERSION: &str = "1.0";

/// Payload key carrying the originating client of a relayed event.
///
/// Part of the wire contract: events tagged with this bridge's own client
/// identifier are dropped on receipt to prevent loops.
pub const ORIGIN_KEY: &str = "__relay_origin";

/// Separator between the client identifier and a local namespace in
/// remote-addressed namespaces (`"<clientId>_<namespace>"`).
pub const NAMESPACE_SEPARATOR: char = '_';

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION must be semver (MAJOR.MINOR.PATCH)");
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn origin_key_is_reserved_shape() {
        assert!(ORIGIN_KEY.starts_with("__"));
    }
}
