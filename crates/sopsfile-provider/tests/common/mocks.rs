//! Mock key resolvers and master keys

use async_trait::async_trait;
use sopsfile_core::EncryptionConfig;
use sopsfile_engine::keys::{KeyEntry, KmsKeyEntry};
use sopsfile_engine::{KeyError, Keyring, MasterKey};
use sopsfile_provider::{EncryptError, KeyResolver, MasterKeyResolver};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Delegates to [`MasterKeyResolver`] and counts calls
#[derive(Debug, Clone, Default)]
pub struct CountingResolver {
    calls: Arc<AtomicUsize>,
}

impl CountingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeyResolver for CountingResolver {
    fn resolve(&self, config: &EncryptionConfig) -> Result<Vec<Box<dyn MasterKey>>, EncryptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        MasterKeyResolver.resolve(config)
    }
}

/// Master key whose key service always refuses
#[derive(Debug, Clone)]
pub struct FailingKey {
    pub identifier: String,
}

impl FailingKey {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

#[async_trait]
impl MasterKey for FailingKey {
    fn key_type(&self) -> &'static str {
        "kms"
    }

    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn encrypted_key(&self) -> Option<&str> {
        None
    }

    async fn encrypt(&mut self, _data_key: &[u8]) -> Result<(), KeyError> {
        Err(KeyError::service("kms", &self.identifier, "AccessDeniedException"))
    }

    async fn decrypt(&self, _keyring: &Keyring) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        Err(KeyError::NotEncrypted {
            key_type: "kms",
            identifier: self.identifier.clone(),
        })
    }

    fn to_entry(&self) -> KeyEntry {
        KeyEntry::Kms(KmsKeyEntry {
            arn: self.identifier.clone(),
            role: None,
            context: None,
            created_at: String::new(),
            enc: String::new(),
            aws_profile: String::new(),
        })
    }
}

/// Resolves the configured keys and appends failing ones
#[derive(Debug, Clone)]
pub struct FailingResolver {
    pub failing: Vec<String>,
}

impl KeyResolver for FailingResolver {
    fn resolve(&self, config: &EncryptionConfig) -> Result<Vec<Box<dyn MasterKey>>, EncryptError> {
        let mut keys = MasterKeyResolver.resolve(config)?;
        keys.extend(
            self.failing
                .iter()
                .map(|id| Box::new(FailingKey::new(id.clone())) as Box<dyn MasterKey>),
        );
        Ok(keys)
    }
}
