//! PGP master keys
//!
//! Wrapping and unwrapping shell out to the GnuPG binary; the key itself
//! lives in the user's keyring.

use super::{format_created_at, parse_created_at, split_key_list, KeyEntry, Keyring, PgpKeyEntry};
use super::MasterKey;
use crate::error::KeyError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use zeroize::Zeroizing;

const KEY_TYPE: &str = "pgp";

/// Environment variable overriding the gpg binary
pub const GPG_EXEC_ENV: &str = "SOPS_GPG_EXEC";

#[derive(Debug, Clone)]
pub struct PgpMasterKey {
    pub fingerprint: String,
    encrypted_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl PgpMasterKey {
    /// Key for a hex fingerprint or key id; spaces are ignored
    pub fn new(fingerprint: &str) -> Result<Self, KeyError> {
        let fingerprint = fingerprint.trim().replace(' ', "");
        if fingerprint.is_empty() || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(KeyError::invalid(
                KEY_TYPE,
                fingerprint,
                "fingerprint must be hexadecimal",
            ));
        }
        Ok(Self {
            fingerprint,
            encrypted_key: None,
            created_at: Utc::now(),
        })
    }

    /// One key per entry of a comma-separated fingerprint list
    pub fn from_fingerprint_string(fingerprints: &str) -> Result<Vec<Self>, KeyError> {
        split_key_list(fingerprints).map(Self::new).collect()
    }

    pub(crate) fn from_entry(entry: PgpKeyEntry) -> Result<Self, KeyError> {
        let created_at = parse_created_at(KEY_TYPE, &entry.fp, &entry.created_at)?;
        Ok(Self {
            fingerprint: entry.fp,
            encrypted_key: Some(entry.enc),
            created_at,
        })
    }

    /// Short key id: the last 16 hex digits of the fingerprint
    fn short_id(&self) -> &str {
        let start = self
            .fingerprint
            .char_indices()
            .rev()
            .nth(15)
            .map_or(0, |(idx, _)| idx);
        &self.fingerprint[start..]
    }

    fn gpg_binary() -> String {
        std::env::var(GPG_EXEC_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "gpg".to_string())
    }

    async fn run_gpg(&self, args: &[&str], input: &[u8]) -> Result<Vec<u8>, KeyError> {
        let binary = Self::gpg_binary();
        debug!(binary = %binary, fingerprint = %self.fingerprint, "Running gpg");

        let mut child = Command::new(&binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                KeyError::service(
                    KEY_TYPE,
                    self.fingerprint.clone(),
                    format!("failed to run {}: {}", binary, e),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await.map_err(|e| {
                KeyError::service(KEY_TYPE, self.fingerprint.clone(), e.to_string())
            })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| KeyError::service(KEY_TYPE, self.fingerprint.clone(), e.to_string()))?;

        if !output.status.success() {
            return Err(KeyError::service(
                KEY_TYPE,
                self.fingerprint.clone(),
                format!(
                    "gpg exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl MasterKey for PgpMasterKey {
    fn key_type(&self) -> &'static str {
        KEY_TYPE
    }

    fn identifier(&self) -> String {
        self.fingerprint.clone()
    }

    fn encrypted_key(&self) -> Option<&str> {
        self.encrypted_key.as_deref()
    }

    async fn encrypt(&mut self, data_key: &[u8]) -> Result<(), KeyError> {
        if self.fingerprint.is_empty() {
            return Err(KeyError::invalid(KEY_TYPE, "", "empty fingerprint"));
        }

        let args = [
            "--no-default-recipient",
            "--yes",
            "--encrypt",
            "-a",
            "-r",
            self.fingerprint.as_str(),
            "--trusted-key",
            self.short_id(),
            "--no-encrypt-to",
        ];
        let armored = self.run_gpg(&args, data_key).await?;
        let armored = String::from_utf8(armored).map_err(|_| {
            KeyError::service(KEY_TYPE, self.fingerprint.clone(), "gpg output is not UTF-8")
        })?;

        self.encrypted_key = Some(armored);
        self.created_at = Utc::now();
        Ok(())
    }

    async fn decrypt(&self, _keyring: &Keyring) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let enc = self.encrypted_key.as_deref().ok_or_else(|| KeyError::NotEncrypted {
            key_type: KEY_TYPE,
            identifier: self.identifier(),
        })?;
        let plaintext = self.run_gpg(&["-d"], enc.as_bytes()).await?;
        Ok(Zeroizing::new(plaintext))
    }

    fn to_entry(&self) -> KeyEntry {
        KeyEntry::Pgp(PgpKeyEntry {
            created_at: format_created_at(self.created_at),
            enc: self.encrypted_key.clone().unwrap_or_default(),
            fp: self.fingerprint.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const FP: &str = "FBC7B9E2A4F9289AC0C1D4843D16CEE4A27381B4";

    #[test]
    fn test_fingerprint_list() {
        let keys =
            PgpMasterKey::from_fingerprint_string(&format!("{}, 85D77543B3D624B6 ,", FP)).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].fingerprint, FP);
        assert_eq!(keys[1].fingerprint, "85D77543B3D624B6");
    }

    #[test]
    fn test_fingerprint_spaces_removed() {
        let key = PgpMasterKey::new("FBC7 B9E2 A4F9 289A").unwrap();
        assert_eq!(key.fingerprint, "FBC7B9E2A4F9289A");
    }

    #[test]
    fn test_short_id() {
        let key = PgpMasterKey::new(FP).unwrap();
        assert_eq!(key.short_id(), "3D16CEE4A27381B4");
        assert_eq!(PgpMasterKey::new("ABCD").unwrap().short_id(), "ABCD");
    }

    #[test]
    fn test_non_hex_fingerprint_rejected() {
        for fingerprint in ["ÄÄÄÄÄÄÄÄA", "not-a-key", "ABCD\u{00e9}"] {
            let err = PgpMasterKey::new(fingerprint).unwrap_err();
            assert!(matches!(err, KeyError::Invalid { .. }), "{}", fingerprint);
        }
        assert!(PgpMasterKey::from_fingerprint_string(&format!("{}, ÄÄÄÄ", FP)).is_err());
    }

    #[test]
    fn test_short_id_of_restored_key() {
        let entry = PgpKeyEntry {
            created_at: "2024-01-01T00:00:00Z".to_string(),
            enc: String::new(),
            fp: "ÄÄÄÄÄÄÄÄÄÄÄÄÄÄÄÄÄÄA".to_string(),
        };
        let key = PgpMasterKey::from_entry(entry).unwrap();
        assert_eq!(key.short_id().chars().count(), 16);
        assert!(key.short_id().ends_with('A'));
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_binary_is_service_error() {
        std::env::set_var(GPG_EXEC_ENV, "/nonexistent/gpg-binary");
        let mut key = PgpMasterKey::new(FP).unwrap();
        let result = key.encrypt(&[1u8; 32]).await;
        std::env::remove_var(GPG_EXEC_ENV);

        let err = result.unwrap_err();
        assert!(matches!(err, KeyError::Service { .. }));
        assert!(err.to_string().contains(FP));
        assert!(key.encrypted_key().is_none());
    }

    #[test]
    fn test_entry_roundtrip() {
        let mut key = PgpMasterKey::new(FP).unwrap();
        key.encrypted_key = Some("-----BEGIN PGP MESSAGE-----".to_string());
        let entry = match key.to_entry() {
            KeyEntry::Pgp(entry) => entry,
            other => panic!("unexpected entry {:?}", other),
        };
        assert_eq!(entry.fp, FP);
        let restored = PgpMasterKey::from_entry(entry).unwrap();
        assert_eq!(restored.encrypted_key(), key.encrypted_key());
    }
}
