//! Key-provider resolution and key-group assembly

use crate::error::EncryptError;
use sopsfile_core::{EncryptionConfig, ProviderKind, UnknownProvider};
use sopsfile_engine::keys::{AgeMasterKey, KmsMasterKey, MasterKey, PgpMasterKey};
use sopsfile_engine::KeyGroup;
use tracing::debug;

/// Turns an encryption config into master-key handles
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, config: &EncryptionConfig) -> Result<Vec<Box<dyn MasterKey>>, EncryptError>;
}

/// Resolver backed by the engine's KMS, PGP and age keys
#[derive(Debug, Clone, Copy, Default)]
pub struct MasterKeyResolver;

impl KeyResolver for MasterKeyResolver {
    fn resolve(&self, config: &EncryptionConfig) -> Result<Vec<Box<dyn MasterKey>>, EncryptError> {
        resolve_master_keys(config)
    }
}

/// Resolve the selected provider's settings into master keys
pub fn resolve_master_keys(
    config: &EncryptionConfig,
) -> Result<Vec<Box<dyn MasterKey>>, EncryptError> {
    let kind: ProviderKind = config.provider.parse().map_err(|UnknownProvider(tag)| {
        EncryptError::UnknownEncryptionProvider { provider: tag }
    })?;
    let not_configured = || EncryptError::ProviderNotConfigured {
        provider: kind.as_str(),
    };

    let keys: Vec<Box<dyn MasterKey>> = match kind {
        ProviderKind::Kms => {
            let kms = config.kms.as_ref().ok_or_else(not_configured)?;
            KmsMasterKey::from_arn_string(&kms.arn, None, kms.profile.as_deref())
                .into_iter()
                .map(|key| Box::new(key) as Box<dyn MasterKey>)
                .collect()
        }
        ProviderKind::Pgp => {
            let pgp = config.pgp.as_ref().ok_or_else(not_configured)?;
            PgpMasterKey::from_fingerprint_string(&pgp.fingerprint)
                .map_err(EncryptError::InvalidMasterKey)?
                .into_iter()
                .map(|key| Box::new(key) as Box<dyn MasterKey>)
                .collect()
        }
        ProviderKind::Age => {
            let age = config.age.as_ref().ok_or_else(not_configured)?;
            AgeMasterKey::from_recipients(&age.recipients)
                .map_err(EncryptError::InvalidMasterKey)?
                .into_iter()
                .map(|key| Box::new(key) as Box<dyn MasterKey>)
                .collect()
        }
    };

    if keys.is_empty() {
        return Err(not_configured());
    }

    debug!(provider = %kind, keys = keys.len(), "Resolved master keys");
    Ok(keys)
}

/// Put every key into a single group
pub fn build_key_groups(keys: Vec<Box<dyn MasterKey>>) -> Vec<KeyGroup> {
    vec![keys]
}

/// Resolve and group the keys for one operation
pub fn key_groups(
    resolver: &dyn KeyResolver,
    config: &EncryptionConfig,
) -> Result<Vec<KeyGroup>, EncryptError> {
    resolver.resolve(config).map(build_key_groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str = "arn:aws:kms:us-west-2:111122223333:key/1234abcd-12ab-34cd-56ef-1234567890ab";

    #[test]
    fn test_kms_single_arn() {
        let config = EncryptionConfig::new("kms").with_kms(ARN, Some("prod".to_string()));
        let groups = key_groups(&MasterKeyResolver, &config).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[0][0].key_type(), "kms");
        assert_eq!(groups[0][0].identifier(), ARN);
    }

    #[test]
    fn test_kms_arn_list() {
        let config = EncryptionConfig::new("kms").with_kms(format!("{},{}", ARN, ARN), None);
        let groups = key_groups(&MasterKeyResolver, &config).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_pgp_fingerprints() {
        let config = EncryptionConfig::new("pgp").with_pgp("AAAA1111, BBBB2222");
        let keys = resolve_master_keys(&config).unwrap();
        let ids: Vec<_> = keys.iter().map(|k| k.identifier()).collect();
        assert_eq!(ids, ["AAAA1111", "BBBB2222"]);

        let config = EncryptionConfig::new("pgp").with_pgp("ÄÄÄÄÄÄÄÄA");
        let err = resolve_master_keys(&config).unwrap_err();
        assert!(matches!(err, EncryptError::InvalidMasterKey(_)));
        assert_eq!(err.exit_code(), crate::codes::ERROR_READING_CONFIG);
    }

    #[test]
    fn test_age_recipients() {
        let recipient = ::age::x25519::Identity::generate().to_public().to_string();
        let config = EncryptionConfig::new("age").with_age(recipient.clone());
        let keys = resolve_master_keys(&config).unwrap();
        assert_eq!(keys[0].identifier(), recipient);

        let config = EncryptionConfig::new("age").with_age("age1garbage");
        assert!(matches!(
            resolve_master_keys(&config),
            Err(EncryptError::InvalidMasterKey(_))
        ));
    }

    #[test]
    fn test_not_configured() {
        let err = resolve_master_keys(&EncryptionConfig::new("kms")).unwrap_err();
        assert!(matches!(err, EncryptError::ProviderNotConfigured { provider: "kms" }));
        assert_eq!(err.to_string(), "kms is not configured");

        let config = EncryptionConfig::new("pgp").with_pgp(" , ");
        assert!(matches!(
            resolve_master_keys(&config),
            Err(EncryptError::ProviderNotConfigured { provider: "pgp" })
        ));
    }

    #[test]
    fn test_unknown_provider() {
        let err = key_groups(&MasterKeyResolver, &EncryptionConfig::new("unknown")).unwrap_err();
        assert!(matches!(
            &err,
            EncryptError::UnknownEncryptionProvider { provider } if provider == "unknown"
        ));
        assert!(err.to_string().contains("unknown"));
    }
}
