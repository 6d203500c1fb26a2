//! Document tree and metadata envelope
//!
//! A document is a list of branches (one per YAML document, one for every
//! other format). Branches keep their key order. Encryption rewrites leaf
//! values in place and records a MAC over the plaintext in the metadata.

use crate::cipher::{is_encrypted, scalar_parts, Cipher};
use crate::error::{Error, KeyError, Result};
use crate::keys::{KeyGroup, Keyring};
use crate::rules::{EncryptionRules, KeyMatcher};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Size of a data key in bytes
pub const DATA_KEY_SIZE: usize = 32;

/// Key under which stores keep the metadata envelope
pub const METADATA_KEY: &str = "sops";

/// A value in the document tree
#[derive(Debug, Clone, PartialEq)]
pub enum TreeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<TreeValue>),
    Branch(TreeBranch),
}

/// A key/value pair within a branch
#[derive(Debug, Clone, PartialEq)]
pub struct TreeItem {
    pub key: String,
    pub value: TreeValue,
}

impl TreeItem {
    pub fn new(key: impl Into<String>, value: TreeValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// An ordered mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeBranch(Vec<TreeItem>);

impl TreeBranch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&TreeValue> {
        self.0.iter().find(|item| item.key == key).map(|item| &item.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|item| item.key == key)
    }

    /// Append an item, replacing the value of an existing key
    pub fn insert(&mut self, key: impl Into<String>, value: TreeValue) {
        let key = key.into();
        match self.0.iter_mut().find(|item| item.key == key) {
            Some(item) => item.value = value,
            None => self.0.push(TreeItem { key, value }),
        }
    }

    /// Mutable value for `key`, inserting a null first if it is missing
    pub fn entry(&mut self, key: &str) -> &mut TreeValue {
        let index = match self.0.iter().position(|item| item.key == key) {
            Some(index) => index,
            None => {
                self.0.push(TreeItem::new(key, TreeValue::Null));
                self.0.len() - 1
            }
        };
        &mut self.0[index].value
    }

    pub fn remove(&mut self, key: &str) -> Option<TreeValue> {
        let index = self.0.iter().position(|item| item.key == key)?;
        Some(self.0.remove(index).value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TreeItem> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TreeItem> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<TreeItem> for TreeBranch {
    fn from_iter<I: IntoIterator<Item = TreeItem>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromIterator<(String, TreeValue)> for TreeBranch {
    fn from_iter<I: IntoIterator<Item = (String, TreeValue)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| TreeItem { key, value })
                .collect(),
        )
    }
}

impl IntoIterator for TreeBranch {
    type Item = TreeItem;
    type IntoIter = std::vec::IntoIter<TreeItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Metadata stored alongside the encrypted document
#[derive(Debug)]
pub struct Metadata {
    pub key_groups: Vec<KeyGroup>,
    pub rules: EncryptionRules,
    pub shamir_threshold: usize,
    pub last_modified: DateTime<Utc>,
    pub message_authentication_code: Option<String>,
    pub version: String,
}

impl Metadata {
    pub fn new(key_groups: Vec<KeyGroup>, rules: EncryptionRules, shamir_threshold: usize) -> Self {
        Self {
            key_groups,
            rules,
            shamir_threshold,
            last_modified: Utc::now(),
            message_authentication_code: None,
            version: crate::VERSION.to_string(),
        }
    }

    /// Timestamp string bound to the MAC
    pub fn last_modified_string(&self) -> String {
        format_timestamp(self.last_modified)
    }
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A parsed document together with its metadata
#[derive(Debug)]
pub struct Tree {
    pub branches: Vec<TreeBranch>,
    pub metadata: Metadata,
    pub file_path: String,
}

impl Tree {
    pub fn new(branches: Vec<TreeBranch>, metadata: Metadata, file_path: impl Into<String>) -> Self {
        Self {
            branches,
            metadata,
            file_path: file_path.into(),
        }
    }

    /// Generate a fresh data key and wrap it under every master key
    ///
    /// All keys are attempted; every failure is returned.
    pub async fn generate_data_key(&mut self) -> std::result::Result<Zeroizing<Vec<u8>>, Vec<KeyError>> {
        let mut data_key = Zeroizing::new(vec![0u8; DATA_KEY_SIZE]);
        rand::rng().fill_bytes(&mut data_key);

        let mut errors = Vec::new();
        let mut wrapped = 0usize;
        for group in self.metadata.key_groups.iter_mut() {
            for key in group.iter_mut() {
                match key.encrypt(&data_key).await {
                    Ok(()) => {
                        wrapped += 1;
                        debug!(key_type = key.key_type(), key = %key.identifier(), "Wrapped data key");
                    }
                    Err(e) => {
                        warn!(
                            key_type = key.key_type(),
                            key = %key.identifier(),
                            error = %e,
                            "Failed to wrap data key"
                        );
                        errors.push(e);
                    }
                }
            }
        }

        if wrapped == 0 && errors.is_empty() {
            errors.push(KeyError::NoMasterKeys);
        }

        if errors.is_empty() {
            Ok(data_key)
        } else {
            Err(errors)
        }
    }

    /// Unwrap the data key with the first master key that succeeds
    pub async fn data_key(&self, keyring: &Keyring) -> Result<Zeroizing<Vec<u8>>> {
        let mut errors = Vec::new();
        for key in self.metadata.key_groups.iter().flatten() {
            match key.decrypt(keyring).await {
                Ok(data_key) => {
                    debug!(key_type = key.key_type(), key = %key.identifier(), "Unwrapped data key");
                    return Ok(data_key);
                }
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            errors.push(KeyError::NoMasterKeys);
        }
        Err(Error::DataKeyUnavailable(errors))
    }

    /// Encrypt every eligible leaf in place and store the MAC
    ///
    /// Returns the plaintext MAC.
    pub fn encrypt(&mut self, data_key: &[u8], cipher: Cipher) -> Result<String> {
        let matcher = self.metadata.rules.compile()?;
        self.metadata.last_modified = Utc::now();

        let mut hasher = Sha512::new();
        let mut path = Vec::new();
        for branch in self.branches.iter_mut() {
            walk_branch(branch, &mut path, &mut |path, value| {
                let Some((plaintext, _)) = scalar_parts(value) else {
                    return Ok(());
                };
                hasher.update(plaintext.as_bytes());
                if matcher.should_encrypt(path) {
                    let encrypted = cipher.encrypt(value, data_key, &leaf_aad(path))?;
                    *value = TreeValue::String(encrypted);
                }
                Ok(())
            })?;
        }

        let mac = hex::encode_upper(hasher.finalize());
        let encrypted_mac = cipher.encrypt(
            &TreeValue::String(mac.clone()),
            data_key,
            &self.metadata.last_modified_string(),
        )?;
        self.metadata.message_authentication_code = Some(encrypted_mac);
        Ok(mac)
    }

    /// Decrypt every encrypted leaf in place and verify the MAC
    pub fn decrypt(&mut self, data_key: &[u8]) -> Result<String> {
        let matcher = self.metadata.rules.compile()?;

        let mut hasher = Sha512::new();
        let mut path = Vec::new();
        for branch in self.branches.iter_mut() {
            walk_branch(branch, &mut path, &mut |path, value| {
                if let Some(encrypted) = encrypted_leaf(&matcher, path, value) {
                    let decrypted = Cipher::decrypt(encrypted, data_key, &leaf_aad(path))?;
                    *value = decrypted;
                }
                if let Some((plaintext, _)) = scalar_parts(value) {
                    hasher.update(plaintext.as_bytes());
                }
                Ok(())
            })?;
        }
        let computed = hex::encode_upper(hasher.finalize());

        let stored = self
            .metadata
            .message_authentication_code
            .as_deref()
            .ok_or(Error::MacNotFound)?;
        let stored = match Cipher::decrypt(stored, data_key, &self.metadata.last_modified_string())? {
            TreeValue::String(mac) => mac,
            _ => return Err(Error::InvalidMetadata("MAC is not a string".to_string())),
        };

        if stored != computed {
            return Err(Error::MacMismatch { stored, computed });
        }
        Ok(computed)
    }
}

fn encrypted_leaf<'a>(matcher: &KeyMatcher, path: &[String], value: &'a TreeValue) -> Option<&'a str> {
    match value {
        TreeValue::String(s) if is_encrypted(s) && matcher.should_encrypt(path) => Some(s),
        _ => None,
    }
}

/// Additional data bound to a leaf: its key path, colon-terminated
fn leaf_aad(path: &[String]) -> String {
    let mut aad = path.join(":");
    aad.push(':');
    aad
}

fn walk_branch<F>(branch: &mut TreeBranch, path: &mut Vec<String>, f: &mut F) -> Result<()>
where
    F: FnMut(&[String], &mut TreeValue) -> Result<()>,
{
    for item in branch.iter_mut() {
        path.push(item.key.clone());
        let result = walk_value(&mut item.value, path, f);
        path.pop();
        result?;
    }
    Ok(())
}

fn walk_value<F>(value: &mut TreeValue, path: &mut Vec<String>, f: &mut F) -> Result<()>
where
    F: FnMut(&[String], &mut TreeValue) -> Result<()>,
{
    match value {
        TreeValue::Branch(branch) => walk_branch(branch, path, f),
        TreeValue::Array(items) => items.iter_mut().try_for_each(|item| walk_value(item, path, f)),
        leaf => f(path, leaf),
    }
}

impl Serialize for TreeBranch {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for item in self.iter() {
            map.serialize_entry(&item.key, &item.value)?;
        }
        map.end()
    }
}

impl Serialize for TreeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            TreeValue::Null => serializer.serialize_unit(),
            TreeValue::Bool(b) => serializer.serialize_bool(*b),
            TreeValue::Int(i) => serializer.serialize_i64(*i),
            TreeValue::Float(f) => serializer.serialize_f64(*f),
            TreeValue::String(s) => serializer.serialize_str(s),
            TreeValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            TreeValue::Branch(branch) => branch.serialize(serializer),
        }
    }
}

struct TreeValueVisitor;

impl<'de> Visitor<'de> for TreeValueVisitor {
    type Value = TreeValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a structured document value")
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<TreeValue, E> {
        Ok(TreeValue::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<TreeValue, E> {
        Ok(TreeValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<TreeValue, E> {
        i64::try_from(v)
            .map(TreeValue::Int)
            .map_err(|_| E::custom(format!("integer {} is out of range", v)))
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<TreeValue, E> {
        Ok(TreeValue::Float(v))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<TreeValue, E> {
        Ok(TreeValue::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<TreeValue, E> {
        Ok(TreeValue::String(v))
    }

    fn visit_unit<E>(self) -> std::result::Result<TreeValue, E> {
        Ok(TreeValue::Null)
    }

    fn visit_none<E>(self) -> std::result::Result<TreeValue, E> {
        Ok(TreeValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<TreeValue, D::Error> {
        TreeValue::deserialize(d)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<TreeValue, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(TreeValue::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<TreeValue, A::Error> {
        let mut branch = TreeBranch::new();
        while let Some(key) = map.next_key::<TreeValue>()? {
            let key = match key {
                TreeValue::String(s) => s,
                TreeValue::Int(i) => i.to_string(),
                TreeValue::Float(f) => f.to_string(),
                TreeValue::Bool(b) => b.to_string(),
                TreeValue::Null => "null".to_string(),
                _ => return Err(de::Error::custom("mapping keys must be scalars")),
            };
            let value = map.next_value()?;
            branch.insert(key, value);
        }
        Ok(TreeValue::Branch(branch))
    }
}

impl<'de> Deserialize<'de> for TreeValue {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        d.deserialize_any(TreeValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{AgeMasterKey, MasterKey};

    fn sample() -> TreeBranch {
        serde_yaml_ng::from_str::<TreeValue>(
            "hello: world\ninteger: 0\nfloat: 0.2\nbool: true\nnull_value: null\n\
             nested:\n  user_unencrypted: admin\n  list: [a, 1]\n",
        )
        .map(|v| match v {
            TreeValue::Branch(b) => b,
            other => panic!("unexpected {:?}", other),
        })
        .unwrap()
    }

    fn tree(groups: Vec<KeyGroup>) -> Tree {
        Tree::new(
            vec![sample()],
            Metadata::new(groups, EncryptionRules::default().with_defaults(), 0),
            "/tmp/doc.yaml",
        )
    }

    #[test]
    fn test_branch_order_and_insert() {
        let mut branch = sample();
        let keys: Vec<_> = branch.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, ["hello", "integer", "float", "bool", "null_value", "nested"]);

        branch.insert("hello", TreeValue::Int(1));
        assert_eq!(branch.get("hello"), Some(&TreeValue::Int(1)));
        assert_eq!(branch.len(), 6);
        assert!(branch.remove("hello").is_some());
        assert!(!branch.contains_key("hello"));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [3u8; DATA_KEY_SIZE];
        let mut tree = tree(vec![]);
        let mac = tree.encrypt(&key, Cipher::Aes256Gcm).unwrap();
        assert_eq!(mac.len(), 128);

        let branch = &tree.branches[0];
        assert!(matches!(branch.get("hello"), Some(TreeValue::String(s)) if s.starts_with("ENC[")));
        assert_eq!(branch.get("null_value"), Some(&TreeValue::Null));
        match branch.get("nested") {
            Some(TreeValue::Branch(nested)) => {
                assert_eq!(
                    nested.get("user_unencrypted"),
                    Some(&TreeValue::String("admin".to_string()))
                );
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(tree.decrypt(&key).unwrap(), mac);
        assert_eq!(tree.branches[0], sample());
    }

    #[test]
    fn test_tampered_value_fails() {
        let key = [3u8; DATA_KEY_SIZE];
        let mut tree = tree(vec![]);
        tree.encrypt(&key, Cipher::Aes256Gcm).unwrap();

        // Moving a ciphertext to another key breaks its AAD
        let hello = tree.branches[0].get("hello").cloned().unwrap();
        tree.branches[0].insert("integer", hello);
        assert!(tree.decrypt(&key).is_err());
    }

    #[test]
    fn test_unencrypted_change_breaks_mac() {
        let key = [3u8; DATA_KEY_SIZE];
        let mut tree = tree(vec![]);
        tree.encrypt(&key, Cipher::Aes256Gcm).unwrap();

        let nested = tree.branches[0]
            .iter_mut()
            .find(|item| item.key == "nested")
            .map(|item| &mut item.value);
        if let Some(TreeValue::Branch(nested)) = nested {
            nested.insert("user_unencrypted", TreeValue::String("root".to_string()));
        }
        assert!(matches!(tree.decrypt(&key), Err(Error::MacMismatch { .. })));
    }

    #[tokio::test]
    async fn test_generate_data_key_without_keys() {
        let mut tree = tree(vec![vec![]]);
        let errors = tree.generate_data_key().await.unwrap_err();
        assert!(matches!(errors.as_slice(), [KeyError::NoMasterKeys]));
    }

    #[tokio::test]
    async fn test_generate_and_unwrap_data_key() {
        let identity = ::age::x25519::Identity::generate();
        let key = AgeMasterKey::new(&identity.to_public().to_string()).unwrap();
        let mut tree = tree(vec![vec![Box::new(key) as Box<dyn MasterKey>]]);

        let data_key = tree.generate_data_key().await.unwrap();
        assert_eq!(data_key.len(), DATA_KEY_SIZE);
        assert!(tree.metadata.key_groups[0][0].encrypted_key().is_some());

        let keyring = Keyring::new().with_age_identity(identity);
        let unwrapped = tree.data_key(&keyring).await.unwrap();
        assert_eq!(unwrapped.as_slice(), data_key.as_slice());

        assert!(matches!(
            tree.data_key(&Keyring::new()).await,
            Err(Error::DataKeyUnavailable(_))
        ));
    }
}
