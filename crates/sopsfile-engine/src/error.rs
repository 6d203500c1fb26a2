//! Error types for sopsfile-engine

use thiserror::Error;

/// Result type alias using sopsfile-engine's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Input could not be parsed by a store
    #[error("could not parse {format} input: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    /// Tree could not be serialized by a store
    #[error("could not emit {format} output: {message}")]
    Emit {
        format: &'static str,
        message: String,
    },

    /// The sops metadata entry is missing
    #[error("sops metadata not found")]
    MetadataNotFound,

    /// The sops metadata entry is malformed
    #[error("invalid sops metadata: {0}")]
    InvalidMetadata(String),

    /// Leaf encryption or decryption failed
    #[error("cipher error: {0}")]
    Cipher(String),

    /// Selective-encryption rules are inconsistent
    #[error("invalid encryption rules: {0}")]
    InvalidRules(String),

    /// The document does not match its message authentication code
    #[error("MAC mismatch: file has {stored}, computed {computed}")]
    MacMismatch { stored: String, computed: String },

    /// The document carries no message authentication code
    #[error("no MAC found in sops metadata")]
    MacNotFound,

    /// No master key could produce the data key
    #[error("could not retrieve the data key:\n  - {}", format_key_errors(.0))]
    DataKeyUnavailable(Vec<KeyError>),
}

/// Master-key failures, collected per key during data-key wrapping
#[derive(Error, Debug)]
pub enum KeyError {
    /// The key service rejected or failed the request
    #[error("{key_type} key {identifier}: {message}")]
    Service {
        key_type: &'static str,
        identifier: String,
        message: String,
    },

    /// The key description itself is malformed
    #[error("invalid {key_type} key '{identifier}': {message}")]
    Invalid {
        key_type: &'static str,
        identifier: String,
        message: String,
    },

    /// Decryption was attempted before the key wrapped anything
    #[error("{key_type} key {identifier} holds no encrypted data key")]
    NotEncrypted {
        key_type: &'static str,
        identifier: String,
    },

    /// No master keys were supplied at all
    #[error("no master keys were provided")]
    NoMasterKeys,
}

impl KeyError {
    pub fn service(
        key_type: &'static str,
        identifier: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Service {
            key_type,
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    pub fn invalid(
        key_type: &'static str,
        identifier: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            key_type,
            identifier: identifier.into(),
            message: message.into(),
        }
    }
}

/// Render a list of key errors one per line
pub fn format_key_errors(errors: &[KeyError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n  - ")
}

impl Error {
    pub fn parse(format: &'static str, message: impl ToString) -> Self {
        Self::Parse {
            format,
            message: message.to_string(),
        }
    }

    pub fn emit(format: &'static str, message: impl ToString) -> Self {
        Self::Emit {
            format,
            message: message.to_string(),
        }
    }

    pub fn cipher(message: impl ToString) -> Self {
        Self::Cipher(message.to_string())
    }
}
