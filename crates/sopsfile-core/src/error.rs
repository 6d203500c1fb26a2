//! Error types for sopsfile-core

use thiserror::Error;

/// Result type alias using sopsfile-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration and manifest errors
#[derive(Error, Debug)]
pub enum Error {
    /// Manifest file not found
    #[error("Manifest file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A required field is set at neither the resource nor the provider level
    #[error("{field} is not set (checked {location} on the resource and the provider)")]
    MissingField { field: String, location: String },

    /// More than one encryption provider block at the same level and no explicit tag
    #[error(
        "Conflicting encryption providers on the {level}: {}. Set exactly one block or choose with encryption_provider",
        providers.join(", ")
    )]
    ConflictingProviders {
        level: &'static str,
        providers: Vec<&'static str>,
    },

    /// No encryption provider at either level
    #[error("No encryption provider selected: configure one of kms, pgp or age on the resource or the provider")]
    NoProviderSelected,

    /// Resource declaration is inconsistent
    #[error("Invalid resource '{name}': {message}")]
    InvalidResource { name: String, message: String },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a missing field error located at a provider block
    pub fn missing_field(field: impl Into<String>, location: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            location: location.into(),
        }
    }

    /// Create an invalid resource error
    pub fn invalid_resource(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResource {
            name: name.into(),
            message: message.into(),
        }
    }
}
