//! Persisted form of the metadata envelope

use crate::error::{Error, Result};
use crate::keys::{AgeKeyEntry, KeyEntry, KeyGroup, KmsKeyEntry, PgpKeyEntry};
use crate::rules::EncryptionRules;
use crate::tree::{format_timestamp, Metadata, TreeValue};
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// The `sops` entry of an encrypted document
///
/// A single key group is written as flat `kms`/`pgp`/`age` lists; several
/// groups are written under `key_groups`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SopsMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kms: Vec<KmsKeyEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pgp: Vec<PgpKeyEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub age: Vec<AgeKeyEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_groups: Vec<KeyGroupEntry>,
    #[serde(
        default,
        skip_serializing_if = "is_zero",
        deserialize_with = "number_or_string"
    )]
    pub shamir_threshold: usize,
    pub lastmodified: String,
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_regex: Option<String>,
    pub version: String,
}

/// One key group when more than one is present
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyGroupEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kms: Vec<KmsKeyEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pgp: Vec<PgpKeyEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub age: Vec<AgeKeyEntry>,
}

impl KeyGroupEntry {
    fn from_group(group: &KeyGroup) -> Self {
        let mut entry = Self::default();
        for key in group {
            match key.to_entry() {
                KeyEntry::Kms(kms) => entry.kms.push(kms),
                KeyEntry::Pgp(pgp) => entry.pgp.push(pgp),
                KeyEntry::Age(age) => entry.age.push(age),
            }
        }
        entry
    }

    fn into_group(self) -> Result<KeyGroup> {
        self.kms
            .into_iter()
            .map(KeyEntry::Kms)
            .chain(self.pgp.into_iter().map(KeyEntry::Pgp))
            .chain(self.age.into_iter().map(KeyEntry::Age))
            .map(|entry| {
                entry
                    .into_master_key()
                    .map_err(|e| Error::InvalidMetadata(e.to_string()))
            })
            .collect()
    }
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// Flat formats store every value as a string
fn number_or_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Threshold {
        Number(usize),
        Text(String),
    }

    match Threshold::deserialize(d)? {
        Threshold::Number(n) => Ok(n),
        Threshold::Text(s) => s.parse().map_err(de::Error::custom),
    }
}

impl SopsMetadata {
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        let mac = metadata
            .message_authentication_code
            .clone()
            .ok_or(Error::MacNotFound)?;

        let mut persisted = Self {
            shamir_threshold: metadata.shamir_threshold,
            lastmodified: format_timestamp(metadata.last_modified),
            mac,
            unencrypted_suffix: metadata.rules.unencrypted_suffix.clone(),
            encrypted_suffix: metadata.rules.encrypted_suffix.clone(),
            unencrypted_regex: metadata.rules.unencrypted_regex.clone(),
            encrypted_regex: metadata.rules.encrypted_regex.clone(),
            version: metadata.version.clone(),
            ..Default::default()
        };

        match metadata.key_groups.as_slice() {
            [] => {}
            [group] => {
                let entry = KeyGroupEntry::from_group(group);
                persisted.kms = entry.kms;
                persisted.pgp = entry.pgp;
                persisted.age = entry.age;
            }
            groups => {
                persisted.key_groups = groups.iter().map(KeyGroupEntry::from_group).collect();
            }
        }

        Ok(persisted)
    }

    pub fn into_metadata(self) -> Result<Metadata> {
        let last_modified = DateTime::parse_from_rfc3339(&self.lastmodified)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| Error::InvalidMetadata(format!("bad lastmodified: {}", e)))?;

        let key_groups = if self.key_groups.is_empty() {
            vec![KeyGroupEntry {
                kms: self.kms,
                pgp: self.pgp,
                age: self.age,
            }
            .into_group()?]
        } else {
            self.key_groups
                .into_iter()
                .map(KeyGroupEntry::into_group)
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Metadata {
            key_groups,
            rules: EncryptionRules {
                unencrypted_suffix: self.unencrypted_suffix,
                encrypted_suffix: self.encrypted_suffix,
                unencrypted_regex: self.unencrypted_regex,
                encrypted_regex: self.encrypted_regex,
            },
            shamir_threshold: self.shamir_threshold,
            last_modified,
            message_authentication_code: Some(self.mac).filter(|mac| !mac.is_empty()),
            version: self.version,
        })
    }

    pub fn to_tree_value(&self, format: &'static str) -> Result<TreeValue> {
        let value = serde_json::to_value(self).map_err(|e| Error::emit(format, e))?;
        TreeValue::deserialize(value).map_err(|e| Error::emit(format, e))
    }

    pub fn from_tree_value(format: &'static str, value: TreeValue) -> Result<Self> {
        let value = serde_json::to_value(&value).map_err(|e| Error::parse(format, e))?;
        serde_json::from_value(value).map_err(|e| Error::InvalidMetadata(e.to_string()))
    }
}
