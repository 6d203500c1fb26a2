//! age master keys
//!
//! The data key is wrapped to an X25519 recipient and stored ASCII-armored.
//! Unwrapping uses identities from the [`Keyring`].

use super::{split_key_list, AgeKeyEntry, KeyEntry, Keyring, MasterKey};
use crate::error::KeyError;
use ::age::armor::{ArmoredReader, ArmoredWriter, Format};
use async_trait::async_trait;
use std::io::{Read, Write};
use zeroize::Zeroizing;

const KEY_TYPE: &str = "age";

#[derive(Clone)]
pub struct AgeMasterKey {
    recipient: ::age::x25519::Recipient,
    encrypted_key: Option<String>,
}

impl std::fmt::Debug for AgeMasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgeMasterKey")
            .field("recipient", &self.recipient.to_string())
            .field("encrypted", &self.encrypted_key.is_some())
            .finish()
    }
}

impl AgeMasterKey {
    /// Key for a single `age1...` recipient
    pub fn new(recipient: &str) -> Result<Self, KeyError> {
        let recipient = recipient
            .trim()
            .parse::<::age::x25519::Recipient>()
            .map_err(|e| KeyError::invalid(KEY_TYPE, recipient.trim(), e.to_string()))?;
        Ok(Self {
            recipient,
            encrypted_key: None,
        })
    }

    /// One key per entry of a comma-separated recipient list
    pub fn from_recipients(recipients: &str) -> Result<Vec<Self>, KeyError> {
        split_key_list(recipients).map(Self::new).collect()
    }

    pub(crate) fn from_entry(entry: AgeKeyEntry) -> Result<Self, KeyError> {
        let mut key = Self::new(&entry.recipient)?;
        key.encrypted_key = Some(entry.enc);
        Ok(key)
    }

    pub fn recipient(&self) -> String {
        self.recipient.to_string()
    }

    fn service_error(&self, message: impl std::fmt::Display) -> KeyError {
        KeyError::service(KEY_TYPE, self.recipient(), message.to_string())
    }
}

#[async_trait]
impl MasterKey for AgeMasterKey {
    fn key_type(&self) -> &'static str {
        KEY_TYPE
    }

    fn identifier(&self) -> String {
        self.recipient()
    }

    fn encrypted_key(&self) -> Option<&str> {
        self.encrypted_key.as_deref()
    }

    async fn encrypt(&mut self, data_key: &[u8]) -> Result<(), KeyError> {
        let encryptor = ::age::Encryptor::with_recipients(std::iter::once(
            &self.recipient as &dyn ::age::Recipient,
        ))
        .map_err(|e| self.service_error(format!("failed to create encryptor: {}", e)))?;

        let mut armored = Vec::new();
        let output = ArmoredWriter::wrap_output(&mut armored, Format::AsciiArmor)
            .map_err(|e| self.service_error(e))?;
        let mut writer = encryptor
            .wrap_output(output)
            .map_err(|e| self.service_error(e))?;
        writer
            .write_all(data_key)
            .map_err(|e| self.service_error(e))?;
        writer
            .finish()
            .and_then(|output| output.finish())
            .map_err(|e| self.service_error(e))?;

        let armored = String::from_utf8(armored)
            .map_err(|_| self.service_error("armored output is not UTF-8"))?;
        self.encrypted_key = Some(armored);
        Ok(())
    }

    async fn decrypt(&self, keyring: &Keyring) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let enc = self.encrypted_key.as_deref().ok_or_else(|| KeyError::NotEncrypted {
            key_type: KEY_TYPE,
            identifier: self.identifier(),
        })?;

        if keyring.age_identities().is_empty() {
            return Err(self.service_error("no age identities available"));
        }

        let decryptor = ::age::Decryptor::new(ArmoredReader::new(enc.as_bytes()))
            .map_err(|e| self.service_error(format!("failed to create decryptor: {}", e)))?;

        let mut reader = decryptor
            .decrypt(
                keyring
                    .age_identities()
                    .iter()
                    .map(|i| i as &dyn ::age::Identity),
            )
            .map_err(|e| self.service_error(format!("failed to unwrap data key: {}", e)))?;

        let mut data_key = Zeroizing::new(Vec::new());
        reader
            .read_to_end(&mut data_key)
            .map_err(|e| self.service_error(e))?;
        Ok(data_key)
    }

    fn to_entry(&self) -> KeyEntry {
        KeyEntry::Age(AgeKeyEntry {
            recipient: self.recipient(),
            enc: self.encrypted_key.clone().unwrap_or_default(),
        })
    }
}
