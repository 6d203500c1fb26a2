//! Leaf value ciphers
//!
//! Every encrypted leaf is stored as a self-describing string:
//!
//! ```text
//! ENC[AES256_GCM,data:<b64>,iv:<b64>,tag:<b64>,type:<str|int|float|bool>]
//! ```
//!
//! The key path of the leaf is bound as additional authenticated data, so a
//! ciphertext cannot be moved to another key without failing authentication.

use crate::error::{Error, Result};
use crate::tree::TreeValue;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;

/// Size of the nonce in bytes (96 bits for both AEADs)
const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes
const TAG_SIZE: usize = 16;

/// AEAD used for leaf values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cipher {
    /// AES-256-GCM (default)
    #[default]
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl Cipher {
    /// Name written into encrypted values
    pub fn name(&self) -> &'static str {
        match self {
            Cipher::Aes256Gcm => "AES256_GCM",
            Cipher::ChaCha20Poly1305 => "CHACHA20_POLY1305",
        }
    }

    fn from_name(name: &str) -> Result<Self> {
        match name {
            "AES256_GCM" => Ok(Cipher::Aes256Gcm),
            "CHACHA20_POLY1305" => Ok(Cipher::ChaCha20Poly1305),
            other => Err(Error::cipher(format!("unsupported cipher {}", other))),
        }
    }

    /// Encrypt a scalar leaf under `key`, binding `aad`
    pub fn encrypt(&self, value: &TreeValue, key: &[u8], aad: &str) -> Result<String> {
        let (plaintext, value_type) = scalar_parts(value)
            .ok_or_else(|| Error::cipher("only scalar values can be encrypted"))?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);

        let payload = Payload {
            msg: plaintext.as_bytes(),
            aad: aad.as_bytes(),
        };
        let mut sealed = match self {
            Cipher::Aes256Gcm => Aes256Gcm::new_from_slice(key)
                .map_err(|e| Error::cipher(format!("invalid data key: {}", e)))?
                .encrypt(Nonce::from_slice(&nonce), payload),
            Cipher::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
                .map_err(|e| Error::cipher(format!("invalid data key: {}", e)))?
                .encrypt(Nonce::from_slice(&nonce), payload),
        }
        .map_err(|e| Error::cipher(format!("encryption failed: {}", e)))?;

        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(format!(
            "ENC[{},data:{},iv:{},tag:{},type:{}]",
            self.name(),
            BASE64.encode(&sealed),
            BASE64.encode(nonce),
            BASE64.encode(&tag),
            value_type
        ))
    }

    /// Decrypt a value produced by [`Cipher::encrypt`]; the cipher is read from the value
    pub fn decrypt(encrypted: &str, key: &[u8], aad: &str) -> Result<TreeValue> {
        let parsed = EncryptedValue::parse(encrypted)?;

        let mut sealed = parsed.data;
        sealed.extend_from_slice(&parsed.tag);

        if parsed.iv.len() != NONCE_SIZE {
            return Err(Error::cipher(format!(
                "invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                parsed.iv.len()
            )));
        }

        let payload = Payload {
            msg: &sealed,
            aad: aad.as_bytes(),
        };
        let nonce = Nonce::from_slice(&parsed.iv);
        let plaintext = match parsed.cipher {
            Cipher::Aes256Gcm => Aes256Gcm::new_from_slice(key)
                .map_err(|e| Error::cipher(format!("invalid data key: {}", e)))?
                .decrypt(nonce, payload),
            Cipher::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
                .map_err(|e| Error::cipher(format!("invalid data key: {}", e)))?
                .decrypt(nonce, payload),
        }
        .map_err(|_| Error::cipher(format!("could not authenticate value at '{}'", aad)))?;

        let text = String::from_utf8(plaintext)
            .map_err(|_| Error::cipher("decrypted value is not valid UTF-8"))?;
        parse_scalar(text, &parsed.value_type)
    }
}

/// Whether a string looks like an encrypted leaf
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with("ENC[") && value.ends_with(']')
}

struct EncryptedValue {
    cipher: Cipher,
    data: Vec<u8>,
    iv: Vec<u8>,
    tag: Vec<u8>,
    value_type: String,
}

impl EncryptedValue {
    fn parse(value: &str) -> Result<Self> {
        let inner = value
            .strip_prefix("ENC[")
            .and_then(|v| v.strip_suffix(']'))
            .ok_or_else(|| Error::cipher("value is not in ENC[...] format"))?;

        let mut parts = inner.split(',');
        let cipher = Cipher::from_name(parts.next().unwrap_or_default())?;

        let (mut data, mut iv, mut tag, mut value_type) = (None, None, None, None);
        for part in parts {
            let (name, field) = part
                .split_once(':')
                .ok_or_else(|| Error::cipher(format!("malformed field '{}'", part)))?;
            match name {
                "data" => data = Some(decode(name, field)?),
                "iv" => iv = Some(decode(name, field)?),
                "tag" => tag = Some(decode(name, field)?),
                "type" => value_type = Some(field.to_string()),
                other => return Err(Error::cipher(format!("unknown field '{}'", other))),
            }
        }

        Ok(Self {
            cipher,
            data: data.ok_or_else(|| Error::cipher("missing data field"))?,
            iv: iv.ok_or_else(|| Error::cipher("missing iv field"))?,
            tag: tag.ok_or_else(|| Error::cipher("missing tag field"))?,
            value_type: value_type.ok_or_else(|| Error::cipher("missing type field"))?,
        })
    }
}

fn decode(name: &str, field: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(field)
        .map_err(|e| Error::cipher(format!("could not decode {}: {}", name, e)))
}

/// Plaintext form and type tag of a scalar; `None` for nulls and containers
pub(crate) fn scalar_parts(value: &TreeValue) -> Option<(String, &'static str)> {
    match value {
        TreeValue::String(s) => Some((s.clone(), "str")),
        TreeValue::Int(i) => Some((i.to_string(), "int")),
        TreeValue::Float(f) => Some((f.to_string(), "float")),
        TreeValue::Bool(b) => Some((b.to_string(), "bool")),
        TreeValue::Null | TreeValue::Array(_) | TreeValue::Branch(_) => None,
    }
}

fn parse_scalar(text: String, value_type: &str) -> Result<TreeValue> {
    let invalid = |e: &dyn std::fmt::Display| {
        Error::cipher(format!("could not parse decrypted {}: {}", value_type, e))
    };
    match value_type {
        "str" => Ok(TreeValue::String(text)),
        "int" => text.parse().map(TreeValue::Int).map_err(|e| invalid(&e)),
        "float" => text.parse().map(TreeValue::Float).map_err(|e| invalid(&e)),
        "bool" => text.parse().map(TreeValue::Bool).map_err(|e| invalid(&e)),
        other => Err(Error::cipher(format!("unknown value type '{}'", other))),
    }
}
