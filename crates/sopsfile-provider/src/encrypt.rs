//! Encryption orchestrator
//!
//! Parses plaintext, refuses already-encrypted documents, resolves key
//! groups, wraps a fresh data key under every master key, encrypts the tree
//! and serializes it. Nothing is read from or written to disk here.

use crate::error::EncryptError;
use crate::guard::ensure_no_metadata;
use crate::keys::{key_groups, KeyResolver, MasterKeyResolver};
use crate::stores::StorePair;
use sopsfile_core::{EncryptionConfig, SelectiveEncryption};
use sopsfile_engine::{Cipher, EncryptionRules, Metadata, Tree, TreeBranch};
use tracing::{debug, info, info_span, Instrument, Span};

/// Selective-encryption rules in engine form, defaulted when none are set
pub fn encryption_rules(rules: &SelectiveEncryption) -> EncryptionRules {
    EncryptionRules {
        unencrypted_suffix: rules.unencrypted_suffix.clone(),
        encrypted_suffix: rules.encrypted_suffix.clone(),
        unencrypted_regex: rules.unencrypted_regex.clone(),
        encrypted_regex: rules.encrypted_regex.clone(),
    }
    .with_defaults()
}

/// A serialized encrypted document and the plaintext it came from
#[derive(Debug, Clone)]
pub struct Encrypted {
    pub content: Vec<u8>,
    /// First plaintext document as parsed by the input store
    pub plaintext: TreeBranch,
}

/// Runs encryption operations under an explicit logging span
#[derive(Debug, Clone)]
pub struct Encryptor<R = MasterKeyResolver> {
    resolver: R,
    cipher: Cipher,
    span: Span,
}

impl Encryptor<MasterKeyResolver> {
    pub fn new(span: Span) -> Self {
        Self::with_resolver(MasterKeyResolver, span)
    }
}

impl Default for Encryptor<MasterKeyResolver> {
    fn default() -> Self {
        Self::new(info_span!(target: "sops", "sops"))
    }
}

impl<R: KeyResolver> Encryptor<R> {
    pub fn with_resolver(resolver: R, span: Span) -> Self {
        Self {
            resolver,
            cipher: Cipher::default(),
            span,
        }
    }

    pub fn with_cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Encrypt `plaintext` and return the serialized encrypted document
    ///
    /// `input_path` is recorded as provenance only.
    pub async fn encrypt(
        &self,
        config: &EncryptionConfig,
        stores: StorePair<'_>,
        input_path: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EncryptError> {
        self.encrypt_document(config, stores, input_path, plaintext)
            .await
            .map(|encrypted| encrypted.content)
    }

    /// Like [`Encryptor::encrypt`], also handing back the parsed plaintext
    pub async fn encrypt_document(
        &self,
        config: &EncryptionConfig,
        stores: StorePair<'_>,
        input_path: &str,
        plaintext: &[u8],
    ) -> Result<Encrypted, EncryptError> {
        let span = info_span!(
            target: "sops",
            parent: &self.span,
            "encrypt",
            path = %input_path,
            provider = %config.provider,
        );
        self.run(config, stores, input_path, plaintext)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        config: &EncryptionConfig,
        stores: StorePair<'_>,
        input_path: &str,
        plaintext: &[u8],
    ) -> Result<Encrypted, EncryptError> {
        let branches = stores
            .input
            .load_plain_file(plaintext)
            .map_err(EncryptError::unmarshal)?;
        let first = branches.first().ok_or_else(EncryptError::empty)?;
        ensure_no_metadata(first)?;
        let first = first.clone();

        let rules = encryption_rules(&config.rules);
        rules
            .compile()
            .map_err(|e| EncryptError::InvalidEncryptionRules(e.to_string()))?;

        let path = std::path::absolute(input_path).map_err(|source| EncryptError::InvalidPath {
            path: input_path.to_string(),
            source,
        })?;

        let groups = key_groups(&self.resolver, config)?;
        debug!(documents = branches.len(), groups = groups.len(), "Building tree");

        let metadata = Metadata::new(groups, rules, config.group_threshold);
        let mut tree = Tree::new(branches, metadata, path.to_string_lossy());

        let data_key = tree
            .generate_data_key()
            .await
            .map_err(|causes| EncryptError::DataKeyGenerationFailed { causes })?;

        tree.encrypt(&data_key, self.cipher)
            .map_err(EncryptError::EncryptTree)?;

        let encrypted = stores
            .output
            .emit_encrypted_file(&tree)
            .map_err(EncryptError::ErrorDumpingTree)?;

        info!(bytes = encrypted.len(), cipher = self.cipher.name(), "Encrypted document");
        Ok(Encrypted {
            content: encrypted,
            plaintext: first,
        })
    }
}
