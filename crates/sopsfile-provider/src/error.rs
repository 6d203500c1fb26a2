//! Error types for sopsfile-provider

use crate::guard::FileAlreadyEncrypted;
use sopsfile_engine::{format_key_errors, KeyError};
use thiserror::Error;

/// Exit codes reported to the host, compatible with the sops command line
pub mod codes {
    pub const ERROR_GENERIC: i32 = 1;
    pub const COULD_NOT_READ_INPUT_FILE: i32 = 2;
    pub const COULD_NOT_WRITE_OUTPUT_FILE: i32 = 3;
    pub const ERROR_DUMPING_TREE: i32 = 4;
    pub const ERROR_READING_CONFIG: i32 = 5;
    pub const ERROR_ENCRYPTING_TREE: i32 = 23;
    pub const NO_ENCRYPTION_KEY_FOUND: i32 = 111;
    pub const COULD_NOT_RETRIEVE_KEY: i32 = 128;
    pub const FILE_ALREADY_ENCRYPTED: i32 = 203;
}

/// Failures of a single encryption operation
#[derive(Error, Debug)]
pub enum EncryptError {
    /// Input could not be parsed, or parsed to nothing
    #[error("{message}")]
    CouldNotReadInputFile { message: String },

    /// The document already carries a metadata envelope
    #[error(transparent)]
    AlreadyEncrypted(#[from] FileAlreadyEncrypted),

    /// The selected provider has no key configured
    #[error("{provider} is not configured")]
    ProviderNotConfigured { provider: &'static str },

    /// The provider tag names no supported provider
    #[error("unknown encryption provider: {provider}")]
    UnknownEncryptionProvider { provider: String },

    /// A configured key could not be parsed
    #[error("invalid master key: {0}")]
    InvalidMasterKey(#[source] KeyError),

    /// Selective-encryption rules are inconsistent
    #[error("invalid encryption rules: {0}")]
    InvalidEncryptionRules(String),

    /// The input path could not be made absolute
    #[error("could not resolve path '{path}': {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// At least one master key failed to wrap the data key
    #[error("Could not generate data key:\n  - {}", format_key_errors(causes))]
    DataKeyGenerationFailed { causes: Vec<KeyError> },

    /// Leaf encryption failed
    #[error("Error encrypting tree: {0}")]
    EncryptTree(#[source] sopsfile_engine::Error),

    /// The encrypted tree could not be serialized
    #[error("Could not marshal tree: {0}")]
    ErrorDumpingTree(#[source] sopsfile_engine::Error),
}

impl EncryptError {
    /// Parse failure reported by the input store
    pub fn unmarshal(err: impl std::fmt::Display) -> Self {
        Self::CouldNotReadInputFile {
            message: format!("Error unmarshalling file: {}", err),
        }
    }

    /// Input parsed to zero documents
    pub fn empty() -> Self {
        Self::CouldNotReadInputFile {
            message: "provided content was empty".to_string(),
        }
    }

    /// Exit code surfaced to the host
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CouldNotReadInputFile { .. } => codes::COULD_NOT_READ_INPUT_FILE,
            Self::AlreadyEncrypted(_) => codes::FILE_ALREADY_ENCRYPTED,
            Self::ProviderNotConfigured { .. } => codes::NO_ENCRYPTION_KEY_FOUND,
            Self::UnknownEncryptionProvider { .. }
            | Self::InvalidMasterKey(_)
            | Self::InvalidEncryptionRules(_) => codes::ERROR_READING_CONFIG,
            Self::InvalidPath { .. } => codes::ERROR_GENERIC,
            Self::DataKeyGenerationFailed { .. } => codes::COULD_NOT_RETRIEVE_KEY,
            Self::EncryptTree(_) => codes::ERROR_ENCRYPTING_TREE,
            Self::ErrorDumpingTree(_) => codes::ERROR_DUMPING_TREE,
        }
    }

    /// Long-form message for terminal display, when there is one
    pub fn user_error(&self) -> Option<String> {
        match self {
            Self::AlreadyEncrypted(err) => Some(err.user_error()),
            _ => None,
        }
    }
}

/// Failures of a resource lifecycle step
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error(transparent)]
    Config(#[from] sopsfile_core::Error),

    #[error(transparent)]
    Encrypt(#[from] EncryptError),

    #[error("Invalid input_type '{value}': {message}")]
    InvalidInputType { value: String, message: String },

    #[error("Could not read source {path}: {source}")]
    ReadSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not read {path}: {source}")]
    ReadOutput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not write {path}: {source}")]
    WriteOutput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not remove {path}: {source}")]
    Remove {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ResourceError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::InvalidInputType { .. } => codes::ERROR_READING_CONFIG,
            Self::Encrypt(e) => e.exit_code(),
            Self::ReadSource { .. } => codes::COULD_NOT_READ_INPUT_FILE,
            Self::ReadOutput { .. } => codes::ERROR_GENERIC,
            Self::WriteOutput { .. } | Self::Remove { .. } => codes::COULD_NOT_WRITE_OUTPUT_FILE,
        }
    }
}
