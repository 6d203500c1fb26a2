//! # sopsfile-core
//!
//! Core library for sopsfile providing:
//! - Manifest parsing (sopsfile.yaml)
//! - Provider-level and resource-level configuration types
//! - The merge layer producing one [`EncryptionConfig`] per resource

pub mod config;
pub mod error;
pub mod types;

pub use config::{Manifest, ManifestFile};
pub use error::{Error, Result};
pub use types::{
    AgeBlock, AgeSettings, EncryptionConfig, FileResourceConfig, KmsBlock, KmsSettings, PgpBlock,
    PgpSettings, ProviderConfig, ProviderKind, SelectiveEncryption, UnknownProvider,
};
