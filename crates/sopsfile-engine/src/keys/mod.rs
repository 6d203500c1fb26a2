//! Master keys
//!
//! A master key wraps the document's data key. Every key of every key group
//! wraps the same data key; any single key can later unwrap it.

pub mod age;
pub mod kms;
pub mod pgp;

use crate::error::KeyError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

pub use self::age::AgeMasterKey;
pub use self::kms::KmsMasterKey;
pub use self::pgp::PgpMasterKey;

/// A key able to wrap and unwrap a data key
#[async_trait]
pub trait MasterKey: Send + Sync + fmt::Debug {
    /// Short type name (kms, pgp, age)
    fn key_type(&self) -> &'static str;

    /// Human-readable identifier used in logs and errors
    fn identifier(&self) -> String;

    /// Wrapped data key, once [`MasterKey::encrypt`] has run
    fn encrypted_key(&self) -> Option<&str>;

    /// Wrap `data_key` and keep the result on the key
    async fn encrypt(&mut self, data_key: &[u8]) -> Result<(), KeyError>;

    /// Unwrap the stored data key
    async fn decrypt(&self, keyring: &Keyring) -> Result<Zeroizing<Vec<u8>>, KeyError>;

    /// Persisted form written into the metadata envelope
    fn to_entry(&self) -> KeyEntry;
}

/// An ordered set of master keys
pub type KeyGroup = Vec<Box<dyn MasterKey>>;

/// Persisted KMS key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsKeyEntry {
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, String>>,
    pub created_at: String,
    pub enc: String,
    #[serde(default)]
    pub aws_profile: String,
}

/// Persisted PGP key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgpKeyEntry {
    pub created_at: String,
    pub enc: String,
    pub fp: String,
}

/// Persisted age key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeKeyEntry {
    pub recipient: String,
    pub enc: String,
}

/// Persisted form of any master key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEntry {
    Kms(KmsKeyEntry),
    Pgp(PgpKeyEntry),
    Age(AgeKeyEntry),
}

impl KeyEntry {
    /// Rebuild a master key from its persisted form
    pub fn into_master_key(self) -> Result<Box<dyn MasterKey>, KeyError> {
        Ok(match self {
            KeyEntry::Kms(entry) => Box::new(KmsMasterKey::from_entry(entry)?),
            KeyEntry::Pgp(entry) => Box::new(PgpMasterKey::from_entry(entry)?),
            KeyEntry::Age(entry) => Box::new(AgeMasterKey::from_entry(entry)?),
        })
    }
}

/// Format a key creation time the way it is persisted
pub(crate) fn format_created_at(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_created_at(
    key_type: &'static str,
    identifier: &str,
    value: &str,
) -> Result<DateTime<Utc>, KeyError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| KeyError::invalid(key_type, identifier, format!("bad created_at: {}", e)))
}

/// Split a comma-separated key list, dropping blanks
pub(crate) fn split_key_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Environment variable holding age identities
pub const AGE_KEY_ENV: &str = "SOPS_AGE_KEY";

/// Environment variable pointing at an age identity file
pub const AGE_KEY_FILE_ENV: &str = "SOPS_AGE_KEY_FILE";

/// Local key material used to unwrap data keys
#[derive(Default)]
pub struct Keyring {
    age_identities: Vec<::age::x25519::Identity>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an age identity
    pub fn with_age_identity(mut self, identity: ::age::x25519::Identity) -> Self {
        self.age_identities.push(identity);
        self
    }

    /// age identities available for unwrapping
    pub fn age_identities(&self) -> &[::age::x25519::Identity] {
        &self.age_identities
    }

    /// Load age identities from `SOPS_AGE_KEY` and `SOPS_AGE_KEY_FILE`
    pub fn from_env() -> Result<Self, KeyError> {
        let mut keyring = Self::new();

        if let Ok(keys) = std::env::var(AGE_KEY_ENV) {
            keyring.add_age_identities(&keys, AGE_KEY_ENV)?;
        }

        if let Ok(path) = std::env::var(AGE_KEY_FILE_ENV) {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                KeyError::invalid("age", path.clone(), format!("could not read key file: {}", e))
            })?;
            keyring.add_age_identities(&content, &path)?;
        }

        Ok(keyring)
    }

    /// Parse identity lines; blank lines and `#` comments are skipped
    fn add_age_identities(&mut self, content: &str, origin: &str) -> Result<(), KeyError> {
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let identity = line
                .parse::<::age::x25519::Identity>()
                .map_err(|e| KeyError::invalid("age", origin, e.to_string()))?;
            self.age_identities.push(identity);
        }
        Ok(())
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keyring(age identities: {})", self.age_identities.len())
    }
}
