//! AWS KMS master keys
//!
//! A key is described by its ARN, optionally followed by `+<role-arn>` to
//! assume a role before calling KMS. The region is taken from the ARN.

use super::{format_created_at, parse_created_at, split_key_list, KeyEntry, KmsKeyEntry, Keyring};
use super::MasterKey;
use crate::error::KeyError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::config::Region;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use zeroize::Zeroizing;

const KEY_TYPE: &str = "kms";

/// Session name used when assuming a role
const ROLE_SESSION_NAME: &str = "sopsfile";

#[derive(Debug, Clone)]
pub struct KmsMasterKey {
    pub arn: String,
    pub role: Option<String>,
    pub profile: Option<String>,
    pub encryption_context: BTreeMap<String, String>,
    encrypted_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl KmsMasterKey {
    /// Key for a single ARN, with an optional `+role` suffix
    pub fn new(arn: &str) -> Self {
        let (arn, role) = match arn.split_once('+') {
            Some((arn, role)) => (arn.trim(), Some(role.trim().to_string())),
            None => (arn.trim(), None),
        };
        Self {
            arn: arn.to_string(),
            role,
            profile: None,
            encryption_context: BTreeMap::new(),
            encrypted_key: None,
            created_at: Utc::now(),
        }
    }

    /// One key per entry of a comma-separated ARN list
    pub fn from_arn_string(
        arns: &str,
        context: Option<&BTreeMap<String, String>>,
        profile: Option<&str>,
    ) -> Vec<Self> {
        split_key_list(arns)
            .map(|arn| {
                let mut key = Self::new(arn);
                key.profile = profile.filter(|p| !p.is_empty()).map(str::to_string);
                if let Some(context) = context {
                    key.encryption_context = context.clone();
                }
                key
            })
            .collect()
    }

    pub(crate) fn from_entry(entry: KmsKeyEntry) -> Result<Self, KeyError> {
        let created_at = parse_created_at(KEY_TYPE, &entry.arn, &entry.created_at)?;
        Ok(Self {
            arn: entry.arn,
            role: entry.role,
            profile: Some(entry.aws_profile).filter(|p| !p.is_empty()),
            encryption_context: entry.context.unwrap_or_default(),
            encrypted_key: Some(entry.enc),
            created_at,
        })
    }

    /// Region encoded in the ARN (`arn:aws:kms:<region>:...`)
    pub fn region(&self) -> Result<&str, KeyError> {
        self.arn
            .split(':')
            .nth(3)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| KeyError::invalid(KEY_TYPE, self.arn.clone(), "ARN has no region"))
    }

    fn context(&self) -> Option<HashMap<String, String>> {
        if self.encryption_context.is_empty() {
            None
        } else {
            Some(
                self.encryption_context
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        }
    }

    async fn client(&self) -> Result<Client, KeyError> {
        let region = Region::new(self.region()?.to_string());

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
        if let Some(profile) = &self.profile {
            debug!(profile = %profile, "Using AWS profile");
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;

        let mut kms_config = aws_sdk_kms::config::Builder::from(&sdk_config);
        if let Some(role) = &self.role {
            debug!(role = %role, "Assuming role for KMS");
            let provider = aws_config::sts::AssumeRoleProvider::builder(role)
                .session_name(ROLE_SESSION_NAME)
                .configure(&sdk_config)
                .build()
                .await;
            kms_config = kms_config.credentials_provider(provider);
        }

        Ok(Client::from_conf(kms_config.build()))
    }
}

#[async_trait]
impl MasterKey for KmsMasterKey {
    fn key_type(&self) -> &'static str {
        KEY_TYPE
    }

    fn identifier(&self) -> String {
        match &self.role {
            Some(role) => format!("{}+{}", self.arn, role),
            None => self.arn.clone(),
        }
    }

    fn encrypted_key(&self) -> Option<&str> {
        self.encrypted_key.as_deref()
    }

    async fn encrypt(&mut self, data_key: &[u8]) -> Result<(), KeyError> {
        let client = self.client().await?;

        let output = client
            .encrypt()
            .key_id(&self.arn)
            .plaintext(Blob::new(data_key.to_vec()))
            .set_encryption_context(self.context())
            .send()
            .await
            .map_err(|e| {
                KeyError::service(KEY_TYPE, self.identifier(), DisplayErrorContext(&e).to_string())
            })?;

        let blob = output.ciphertext_blob().ok_or_else(|| {
            KeyError::service(KEY_TYPE, self.identifier(), "response contained no ciphertext")
        })?;

        self.encrypted_key = Some(BASE64.encode(blob.as_ref()));
        self.created_at = Utc::now();
        debug!(arn = %self.arn, "Wrapped data key with KMS");
        Ok(())
    }

    async fn decrypt(&self, _keyring: &Keyring) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let enc = self.encrypted_key.as_deref().ok_or_else(|| KeyError::NotEncrypted {
            key_type: KEY_TYPE,
            identifier: self.identifier(),
        })?;
        let ciphertext = BASE64.decode(enc).map_err(|e| {
            KeyError::invalid(KEY_TYPE, self.identifier(), format!("bad enc: {}", e))
        })?;

        let client = self.client().await?;
        let output = client
            .decrypt()
            .key_id(&self.arn)
            .ciphertext_blob(Blob::new(ciphertext))
            .set_encryption_context(self.context())
            .send()
            .await
            .map_err(|e| {
                KeyError::service(KEY_TYPE, self.identifier(), DisplayErrorContext(&e).to_string())
            })?;

        let plaintext = output.plaintext().ok_or_else(|| {
            KeyError::service(KEY_TYPE, self.identifier(), "response contained no plaintext")
        })?;

        Ok(Zeroizing::new(plaintext.as_ref().to_vec()))
    }

    fn to_entry(&self) -> KeyEntry {
        KeyEntry::Kms(KmsKeyEntry {
            arn: self.arn.clone(),
            role: self.role.clone(),
            context: Some(self.encryption_context.clone()).filter(|c| !c.is_empty()),
            created_at: format_created_at(self.created_at),
            enc: self.encrypted_key.clone().unwrap_or_default(),
            aws_profile: self.profile.clone().unwrap_or_default(),
        })
    }
}
