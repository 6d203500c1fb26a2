//! Declarative configuration types
//!
//! Provider-level defaults ([`ProviderConfig`]) and per-resource declarations
//! ([`FileResourceConfig`]) are parsed from YAML as-is; nothing here is
//! validated until [`EncryptionConfig::merge`](crate::EncryptionConfig::merge)
//! combines both levels.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `kms { arn, profile }` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KmsBlock {
    /// ARN of the KMS key, or a comma-separated list of ARNs
    #[serde(default)]
    pub arn: Option<String>,

    /// AWS profile used to reach KMS
    #[serde(default)]
    pub profile: Option<String>,
}

/// `pgp { fingerprint }` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PgpBlock {
    /// PGP fingerprint, or a comma-separated list of fingerprints
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// `age { recipients }` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgeBlock {
    /// age X25519 recipient, or a comma-separated list of recipients
    #[serde(default)]
    pub recipients: Option<String>,
}

/// Provider-level defaults, declared once per manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Explicit default provider tag; only needed when several blocks are set
    #[serde(default)]
    pub encryption_provider: Option<String>,

    #[serde(default)]
    pub kms: Option<KmsBlock>,

    #[serde(default)]
    pub pgp: Option<PgpBlock>,

    #[serde(default)]
    pub age: Option<AgeBlock>,
}

impl ProviderConfig {
    /// Provider kinds that have a block declared at this level
    pub fn declared_providers(&self) -> Vec<ProviderKind> {
        declared(self.kms.is_some(), self.pgp.is_some(), self.age.is_some())
    }
}

/// A `sops_file` resource instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileResourceConfig {
    /// Inline plaintext content
    #[serde(default)]
    pub content: Option<String>,

    /// Path to a plaintext file, relative to the manifest directory
    #[serde(default)]
    pub source: Option<String>,

    /// Where the encrypted file is written; its extension selects the format
    pub filename: String,

    /// Format hint overriding the filename extension (yaml, json, dotenv, binary)
    #[serde(default)]
    pub input_type: Option<String>,

    /// Explicit provider tag for this resource
    #[serde(default)]
    pub encryption_provider: Option<String>,

    #[serde(default)]
    pub kms: Option<KmsBlock>,

    #[serde(default)]
    pub pgp: Option<PgpBlock>,

    #[serde(default)]
    pub age: Option<AgeBlock>,

    #[serde(default)]
    pub unencrypted_suffix: Option<String>,

    #[serde(default)]
    pub encrypted_suffix: Option<String>,

    #[serde(default)]
    pub unencrypted_regex: Option<String>,

    #[serde(default)]
    pub encrypted_regex: Option<String>,

    /// Number of key groups required to recover the data key
    #[serde(default)]
    pub group_threshold: Option<usize>,
}

impl FileResourceConfig {
    /// Provider kinds that have a block declared on this resource
    pub fn declared_providers(&self) -> Vec<ProviderKind> {
        declared(self.kms.is_some(), self.pgp.is_some(), self.age.is_some())
    }

    /// Check the resource-local invariants that do not involve the provider
    pub fn validate(&self, name: &str) -> Result<()> {
        match (&self.content, &self.source) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid_resource(
                    name,
                    "content and source are mutually exclusive",
                ))
            }
            (None, None) => {
                return Err(Error::invalid_resource(
                    name,
                    "one of content or source must be set",
                ))
            }
            _ => {}
        }

        if self.filename.trim().is_empty() {
            return Err(Error::invalid_resource(name, "filename must not be empty"));
        }

        Ok(())
    }
}

fn declared(kms: bool, pgp: bool, age: bool) -> Vec<ProviderKind> {
    [
        (kms, ProviderKind::Kms),
        (pgp, ProviderKind::Pgp),
        (age, ProviderKind::Age),
    ]
    .into_iter()
    .filter_map(|(set, kind)| set.then_some(kind))
    .collect()
}

/// Supported encryption providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Kms,
    Pgp,
    Age,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Kms => "kms",
            ProviderKind::Pgp => "pgp",
            ProviderKind::Age => "age",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a provider tag names no supported provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown encryption provider: {}", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "kms" => Ok(ProviderKind::Kms),
            "pgp" => Ok(ProviderKind::Pgp),
            "age" => Ok(ProviderKind::Age),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Effective KMS settings after merging
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KmsSettings {
    pub arn: String,
    pub profile: Option<String>,
}

/// Effective PGP settings after merging
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PgpSettings {
    pub fingerprint: String,
}

/// Effective age settings after merging
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgeSettings {
    pub recipients: String,
}

/// Which leaves of the document get encrypted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectiveEncryption {
    pub unencrypted_suffix: Option<String>,
    pub encrypted_suffix: Option<String>,
    pub unencrypted_regex: Option<String>,
    pub encrypted_regex: Option<String>,
}

/// The resolved configuration for one encryption operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptionConfig {
    /// Selected provider tag, as declared
    pub provider: String,
    pub kms: Option<KmsSettings>,
    pub pgp: Option<PgpSettings>,
    pub age: Option<AgeSettings>,
    pub rules: SelectiveEncryption,
    pub group_threshold: usize,
}

impl EncryptionConfig {
    /// Empty configuration for a provider tag; settings are filled in by the caller
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kms: None,
            pgp: None,
            age: None,
            rules: SelectiveEncryption::default(),
            group_threshold: 0,
        }
    }

    pub fn with_kms(mut self, arn: impl Into<String>, profile: Option<String>) -> Self {
        self.kms = Some(KmsSettings {
            arn: arn.into(),
            profile,
        });
        self
    }

    pub fn with_pgp(mut self, fingerprint: impl Into<String>) -> Self {
        self.pgp = Some(PgpSettings {
            fingerprint: fingerprint.into(),
        });
        self
    }

    pub fn with_age(mut self, recipients: impl Into<String>) -> Self {
        self.age = Some(AgeSettings {
            recipients: recipients.into(),
        });
        self
    }

    pub fn with_rules(mut self, rules: SelectiveEncryption) -> Self {
        self.rules = rules;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("kms".parse::<ProviderKind>().unwrap(), ProviderKind::Kms);
        assert_eq!("pgp".parse::<ProviderKind>().unwrap(), ProviderKind::Pgp);
        assert_eq!("age".parse::<ProviderKind>().unwrap(), ProviderKind::Age);

        let err = "vault".parse::<ProviderKind>().unwrap_err();
        assert_eq!(err, UnknownProvider("vault".to_string()));
        assert!(err.to_string().contains("vault"));
    }

    #[test]
    fn test_resource_deserialize() {
        let yaml = r#"
filename: secrets/app.yaml
content: "hello: world"
kms:
  arn: arn:aws:kms:us-west-2:111122223333:key/abcd
  profile: prod
"#;
        let resource: FileResourceConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(resource.filename, "secrets/app.yaml");
        assert_eq!(resource.declared_providers(), vec![ProviderKind::Kms]);
        assert_eq!(
            resource.kms.unwrap().profile.as_deref(),
            Some("prod")
        );
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = "filename: a.yaml\ncontent: x\nkms:\n  key: abc\n";
        assert!(serde_yaml_ng::from_str::<FileResourceConfig>(yaml).is_err());
    }

    #[test]
    fn test_validate_content_source_exclusive() {
        let both = FileResourceConfig {
            content: Some("a: b".to_string()),
            source: Some("a.yaml".to_string()),
            filename: "out.yaml".to_string(),
            ..Default::default()
        };
        let err = both.validate("x").unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));

        let neither = FileResourceConfig {
            filename: "out.yaml".to_string(),
            ..Default::default()
        };
        assert!(neither.validate("x").is_err());

        let content_only = FileResourceConfig {
            content: Some(String::new()),
            filename: "out.yaml".to_string(),
            ..Default::default()
        };
        assert!(content_only.validate("x").is_ok());
    }

    #[test]
    fn test_validate_empty_filename() {
        let resource = FileResourceConfig {
            content: Some("a: b".to_string()),
            filename: "  ".to_string(),
            ..Default::default()
        };
        assert!(resource.validate("x").is_err());
    }
}
