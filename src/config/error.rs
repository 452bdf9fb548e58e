// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the configuration module.

use std::fmt;
use std::io;
use thiserror::Error;

/// Errors that can occur while reading configuration or building rules from it.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The requested configuration key was not found.
    #[error("configuration key not found")]
    NotFound,

    /// A value could not be parsed or deserialized.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// An IO error occurred (e.g., while reading a configuration file).
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// An error related to a specific configuration provider.
    #[error("provider error: {provider}: {message}")]
    ProviderError { provider: String, message: String },

    /// A target-server rule is malformed or conflicts with another rule.
    #[error("invalid server url rule '{url}': {reason}")]
    InvalidRule { url: String, reason: String },

    /// A generic error.
    #[error("{0}")]
    Other(String),
}

impl ConfigError {
    pub fn provider_error<P: fmt::Display, M: fmt::Display>(provider: P, message: M) -> Self {
        Self::ProviderError {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    pub fn invalid_rule<U: fmt::Display, R: fmt::Display>(url: U, reason: R) -> Self {
        Self::InvalidRule {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_parse_error_display() {
        let error = ConfigError::ParseError("invalid JSON".to_string());
        assert_eq!(
            error.to_string(),
            "failed to parse configuration: invalid JSON"
        );
    }

    #[test]
    fn test_io_error_from_conversion_keeps_source() {
        let error: ConfigError = IoError::new(ErrorKind::PermissionDenied, "access denied").into();

        assert!(matches!(error, ConfigError::IoError(_)));
        assert_eq!(error.source().unwrap().to_string(), "access denied");
    }

    #[test]
    fn test_provider_error_constructor() {
        let error = ConfigError::provider_error("file", "invalid format");
        assert_eq!(error.to_string(), "provider error: file: invalid format");
    }

    #[test]
    fn test_invalid_rule_constructor() {
        let error = ConfigError::invalid_rule("https://gis.example.com/arcgis", "duplicate url");

        match &error {
            ConfigError::InvalidRule { url, reason } => {
                assert_eq!(url, "https://gis.example.com/arcgis");
                assert_eq!(reason, "duplicate url");
            }
            _ => panic!("Expected InvalidRule variant"),
        }
        assert!(error.source().is_none());
    }
}
