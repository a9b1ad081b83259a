//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading or validating settings.
///
/// All of these are fatal at construction: the bridge refuses to start
/// rather than run with a broken configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The remote instance URL is missing.
    #[error("ad_url is required and was not provided")]
    MissingUrl,
    /// The remote namespace mapping is missing or empty.
    #[error("remote_namespaces is required and must be non-empty")]
    EmptyNamespaceMap,
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_url_display() {
        assert!(SettingsError::MissingUrl.to_string().contains("ad_url"));
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SettingsError = io_err.into();
        assert!(matches!(err, SettingsError::Io(_)));
    }

    #[test]
    fn json_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: SettingsError = json_err.into();
        assert!(matches!(err, SettingsError::Json(_)));
    }
}
