//! Provider/resource configuration merge
//!
//! Precedence when choosing the provider (high to low):
//! 1. Resource `encryption_provider` tag
//! 2. The single provider block declared on the resource
//! 3. Provider `encryption_provider` tag
//! 4. The single provider block declared on the provider
//!
//! Several blocks at the deciding level without a tag is an error. The chosen
//! provider's settings are then merged field by field, resource over provider.

use crate::error::{Error, Result};
use crate::types::{
    AgeSettings, EncryptionConfig, FileResourceConfig, KmsSettings, PgpSettings, ProviderConfig,
    ProviderKind, SelectiveEncryption,
};
use tracing::debug;

impl EncryptionConfig {
    /// Merge provider-level defaults with a resource declaration
    pub fn merge(provider: &ProviderConfig, resource: &FileResourceConfig) -> Result<Self> {
        let tag = select_provider(provider, resource)?;
        let mut config = EncryptionConfig::new(tag.clone());

        match tag.parse::<ProviderKind>() {
            Ok(ProviderKind::Kms) => {
                let res = resource.kms.as_ref();
                let prov = provider.kms.as_ref();
                let arn = pick(
                    res.and_then(|b| b.arn.as_deref()),
                    prov.and_then(|b| b.arn.as_deref()),
                )
                .ok_or_else(|| Error::missing_field("arn", "kms"))?;
                let profile = pick(
                    res.and_then(|b| b.profile.as_deref()),
                    prov.and_then(|b| b.profile.as_deref()),
                );
                config.kms = Some(KmsSettings { arn, profile });
            }
            Ok(ProviderKind::Pgp) => {
                let fingerprint = pick(
                    resource.pgp.as_ref().and_then(|b| b.fingerprint.as_deref()),
                    provider.pgp.as_ref().and_then(|b| b.fingerprint.as_deref()),
                )
                .ok_or_else(|| Error::missing_field("fingerprint", "pgp"))?;
                config.pgp = Some(PgpSettings { fingerprint });
            }
            Ok(ProviderKind::Age) => {
                let recipients = pick(
                    resource.age.as_ref().and_then(|b| b.recipients.as_deref()),
                    provider.age.as_ref().and_then(|b| b.recipients.as_deref()),
                )
                .ok_or_else(|| Error::missing_field("recipients", "age"))?;
                config.age = Some(AgeSettings { recipients });
            }
            // The key resolver owns the list of providers and reports unknown tags
            Err(unknown) => debug!(provider = %unknown.0, "passing unrecognized provider tag through"),
        }

        config.rules = SelectiveEncryption {
            unencrypted_suffix: resource.unencrypted_suffix.clone(),
            encrypted_suffix: resource.encrypted_suffix.clone(),
            unencrypted_regex: resource.unencrypted_regex.clone(),
            encrypted_regex: resource.encrypted_regex.clone(),
        };
        config.group_threshold = resource.group_threshold.unwrap_or(0);

        debug!(provider = %config.provider, "merged encryption config");
        Ok(config)
    }
}

fn select_provider(provider: &ProviderConfig, resource: &FileResourceConfig) -> Result<String> {
    if let Some(tag) = non_empty(resource.encryption_provider.as_deref()) {
        return Ok(tag.to_string());
    }

    match resource.declared_providers().as_slice() {
        [] => {}
        [one] => return Ok(one.to_string()),
        many => {
            return Err(Error::ConflictingProviders {
                level: "resource",
                providers: many.iter().map(|k| k.as_str()).collect(),
            })
        }
    }

    if let Some(tag) = non_empty(provider.encryption_provider.as_deref()) {
        return Ok(tag.to_string());
    }

    match provider.declared_providers().as_slice() {
        [] => Err(Error::NoProviderSelected),
        [one] => Ok(one.to_string()),
        many => Err(Error::ConflictingProviders {
            level: "provider",
            providers: many.iter().map(|k| k.as_str()).collect(),
        }),
    }
}

/// Resource value if set, provider value otherwise; empty strings count as unset
fn pick(resource: Option<&str>, provider: Option<&str>) -> Option<String> {
    non_empty(resource)
        .or_else(|| non_empty(provider))
        .map(str::to_string)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgeBlock, KmsBlock, PgpBlock};

    const PROVIDER_ARN: &str = "arn:aws:kms:us-west-2:111122223333:key/provider";
    const RESOURCE_ARN: &str = "arn:aws:kms:us-west-2:111122223333:key/resource";

    fn resource() -> FileResourceConfig {
        FileResourceConfig {
            content: Some("hello: world".to_string()),
            filename: "out.yaml".to_string(),
            ..Default::default()
        }
    }

    fn kms(arn: Option<&str>, profile: Option<&str>) -> Option<KmsBlock> {
        Some(KmsBlock {
            arn: arn.map(str::to_string),
            profile: profile.map(str::to_string),
        })
    }

    #[test]
    fn test_provider_defaults_used() {
        let provider = ProviderConfig {
            kms: kms(Some(PROVIDER_ARN), Some("default")),
            ..Default::default()
        };

        let config = EncryptionConfig::merge(&provider, &resource()).unwrap();
        assert_eq!(config.provider, "kms");
        let settings = config.kms.unwrap();
        assert_eq!(settings.arn, PROVIDER_ARN);
        assert_eq!(settings.profile.as_deref(), Some("default"));
    }

    #[test]
    fn test_resource_overrides_provider() {
        let provider = ProviderConfig {
            kms: kms(Some(PROVIDER_ARN), Some("default")),
            ..Default::default()
        };
        let mut res = resource();
        res.kms = kms(Some(RESOURCE_ARN), None);

        let config = EncryptionConfig::merge(&provider, &res).unwrap();
        let settings = config.kms.unwrap();
        assert_eq!(settings.arn, RESOURCE_ARN);
        // Fields the resource leaves unset still come from the provider
        assert_eq!(settings.profile.as_deref(), Some("default"));
    }

    #[test]
    fn test_arn_only_on_provider_with_resource_block() {
        let provider = ProviderConfig {
            kms: kms(Some(PROVIDER_ARN), None),
            ..Default::default()
        };
        let mut res = resource();
        res.kms = kms(None, Some("ops"));

        let config = EncryptionConfig::merge(&provider, &res).unwrap();
        let settings = config.kms.unwrap();
        assert_eq!(settings.arn, PROVIDER_ARN);
        assert_eq!(settings.profile.as_deref(), Some("ops"));
    }

    #[test]
    fn test_missing_arn_is_field_error() {
        let mut res = resource();
        res.kms = kms(None, Some("ops"));

        let err = EncryptionConfig::merge(&ProviderConfig::default(), &res).unwrap_err();
        match err {
            Error::MissingField { field, location } => {
                assert_eq!(field, "arn");
                assert_eq!(location, "kms");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_arn_counts_as_unset() {
        let mut res = resource();
        res.kms = kms(Some(""), None);

        let err = EncryptionConfig::merge(&ProviderConfig::default(), &res).unwrap_err();
        assert!(matches!(err, Error::MissingField { .. }));
    }

    #[test]
    fn test_resource_block_wins_over_other_provider_kind() {
        let provider = ProviderConfig {
            kms: kms(Some(PROVIDER_ARN), None),
            ..Default::default()
        };
        let mut res = resource();
        res.pgp = Some(PgpBlock {
            fingerprint: Some("85D77543B3D624B63CEA9E6DBC17301B491B3F21".to_string()),
        });

        let config = EncryptionConfig::merge(&provider, &res).unwrap();
        assert_eq!(config.provider, "pgp");
        assert!(config.kms.is_none());
        assert!(config.pgp.is_some());
    }

    #[test]
    fn test_conflicting_blocks_on_resource() {
        let mut res = resource();
        res.kms = kms(Some(RESOURCE_ARN), None);
        res.age = Some(AgeBlock {
            recipients: Some("age1xyz".to_string()),
        });

        let err = EncryptionConfig::merge(&ProviderConfig::default(), &res).unwrap_err();
        match err {
            Error::ConflictingProviders { level, providers } => {
                assert_eq!(level, "resource");
                assert_eq!(providers, vec!["kms", "age"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_explicit_tag_resolves_conflict() {
        let mut res = resource();
        res.encryption_provider = Some("age".to_string());
        res.kms = kms(Some(RESOURCE_ARN), None);
        res.age = Some(AgeBlock {
            recipients: Some("age1xyz".to_string()),
        });

        let config = EncryptionConfig::merge(&ProviderConfig::default(), &res).unwrap();
        assert_eq!(config.provider, "age");
        assert_eq!(config.age.unwrap().recipients, "age1xyz");
    }

    #[test]
    fn test_conflicting_blocks_on_provider() {
        let provider = ProviderConfig {
            kms: kms(Some(PROVIDER_ARN), None),
            pgp: Some(PgpBlock {
                fingerprint: Some("ABCD".to_string()),
            }),
            ..Default::default()
        };

        let err = EncryptionConfig::merge(&provider, &resource()).unwrap_err();
        assert!(matches!(
            err,
            Error::ConflictingProviders {
                level: "provider",
                ..
            }
        ));
    }

    #[test]
    fn test_no_provider_selected() {
        let err = EncryptionConfig::merge(&ProviderConfig::default(), &resource()).unwrap_err();
        assert!(matches!(err, Error::NoProviderSelected));
    }

    #[test]
    fn test_unknown_tag_passes_through() {
        let mut res = resource();
        res.encryption_provider = Some("unknown".to_string());

        let config = EncryptionConfig::merge(&ProviderConfig::default(), &res).unwrap();
        assert_eq!(config.provider, "unknown");
        assert!(config.kms.is_none() && config.pgp.is_none() && config.age.is_none());
    }

    #[test]
    fn test_rules_and_threshold_from_resource() {
        let provider = ProviderConfig {
            kms: kms(Some(PROVIDER_ARN), None),
            ..Default::default()
        };
        let mut res = resource();
        res.encrypted_regex = Some("^(data|stringData)$".to_string());
        res.group_threshold = Some(1);

        let config = EncryptionConfig::merge(&provider, &res).unwrap();
        assert_eq!(
            config.rules.encrypted_regex.as_deref(),
            Some("^(data|stringData)$")
        );
        assert_eq!(config.group_threshold, 1);
    }
}
