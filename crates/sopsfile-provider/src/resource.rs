//! The `sops_file` resource: encrypt declared plaintext to a file on disk

use crate::encrypt::{Encrypted, Encryptor};
use crate::error::ResourceError;
use crate::keys::{KeyResolver, MasterKeyResolver};
use crate::stores::{resolve_stores, StorePair};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sopsfile_core::{EncryptionConfig, FileResourceConfig, ProviderConfig};
use sopsfile_engine::{StoreRegistry, TreeBranch, TreeValue};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Resource type name
pub const RESOURCE_TYPE: &str = "sops_file";

/// Recorded state of a created resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    /// Hex SHA-256 of the encrypted bytes
    pub id: String,

    /// Target filename as declared
    pub filename: String,

    pub encrypted_content: String,

    /// Flattened plaintext of the first document
    #[serde(default)]
    pub data: BTreeMap<String, String>,

    /// Digest of everything that went into the encryption
    pub input_hash: String,
}

/// What applying a resource would do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Create,
    Replace,
    /// Recorded in state but no longer declared
    Delete,
    #[serde(rename = "no-op")]
    NoOp,
}

/// A planned change for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action: PlanAction,
    pub resource: String,
    pub description: String,
}

/// One declared `sops_file`
#[derive(Debug, Clone)]
pub struct FileResource<R = MasterKeyResolver> {
    name: String,
    config: FileResourceConfig,
    provider_config: Arc<ProviderConfig>,
    stores: Arc<StoreRegistry>,
    encryptor: Encryptor<R>,
    base_dir: Utf8PathBuf,
}

impl<R: KeyResolver> FileResource<R> {
    pub(crate) fn new(
        name: String,
        config: FileResourceConfig,
        provider_config: Arc<ProviderConfig>,
        stores: Arc<StoreRegistry>,
        encryptor: Encryptor<R>,
    ) -> Self {
        Self {
            name,
            config,
            provider_config,
            stores,
            encryptor,
            base_dir: Utf8PathBuf::from("."),
        }
    }

    /// Resolve relative `source` and `filename` against `dir`
    pub fn with_base_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &FileResourceConfig {
        &self.config
    }

    pub fn encryptor(&self) -> &Encryptor<R> {
        &self.encryptor
    }

    /// Provider defaults merged with this resource's overrides
    pub fn effective_config(&self) -> Result<EncryptionConfig, ResourceError> {
        Ok(EncryptionConfig::merge(&self.provider_config, &self.config)?)
    }

    /// Where the encrypted file is written
    pub fn target_path(&self) -> Utf8PathBuf {
        self.resolve(&self.config.filename)
    }

    /// Inline content, or the bytes of `source`
    pub async fn read_plaintext(&self) -> Result<Vec<u8>, ResourceError> {
        if let Some(content) = &self.config.content {
            return Ok(content.as_bytes().to_vec());
        }

        let source = self.config.source.as_deref().unwrap_or_default();
        let path = self.resolve(&shellexpand::tilde(source));
        debug!(resource = %self.name, source = %path, "Reading source");
        tokio::fs::read(&path)
            .await
            .map_err(|source| ResourceError::ReadSource {
                path: path.to_string(),
                source,
            })
    }

    /// Compare the declaration with `prior` state
    pub async fn plan(&self, prior: Option<&FileState>) -> Result<PlannedAction, ResourceError> {
        self.config.validate(&self.name)?;
        let config = self.effective_config()?;
        self.store_pair()?;
        let plaintext = self.read_plaintext().await?;
        let input_hash = input_hash(&self.config.filename, &config, &plaintext);

        let (action, description) = match prior {
            None => (
                PlanAction::Create,
                format!("encrypt with {} into {}", config.provider, self.config.filename),
            ),
            Some(state) if state.filename != self.config.filename => (
                PlanAction::Replace,
                format!("move {} to {}", state.filename, self.config.filename),
            ),
            Some(state) => {
                let current = self.read(state).await?;
                match current {
                    None => (
                        PlanAction::Create,
                        format!("{} is missing or was modified", state.filename),
                    ),
                    Some(state) if state.input_hash != input_hash => (
                        PlanAction::Replace,
                        format!("content or keys of {} changed", state.filename),
                    ),
                    Some(state) => (PlanAction::NoOp, format!("{} is up to date", state.filename)),
                }
            }
        };

        Ok(PlannedAction {
            action,
            resource: self.name.clone(),
            description,
        })
    }

    /// Encrypt the plaintext and write it to the target file
    pub async fn create(&self) -> Result<FileState, ResourceError> {
        self.config.validate(&self.name)?;
        let config = self.effective_config()?;
        let stores = self.store_pair()?;
        let plaintext = self.read_plaintext().await?;
        let target = self.target_path();

        let Encrypted {
            content: encrypted,
            plaintext: document,
        } = self
            .encryptor
            .encrypt_document(&config, stores, target.as_str(), &plaintext)
            .await?;

        write_private(&target, &encrypted).await?;

        let id = hex::encode(Sha256::digest(&encrypted));

        info!(resource = %self.name, path = %target, id = %id, "Wrote encrypted file");
        Ok(FileState {
            id,
            filename: self.config.filename.clone(),
            encrypted_content: String::from_utf8_lossy(&encrypted).into_owned(),
            data: flatten_data(&document),
            input_hash: input_hash(&self.config.filename, &config, &plaintext),
        })
    }

    /// Refresh `state`; `None` when the file is gone or no longer matches
    pub async fn read(&self, state: &FileState) -> Result<Option<FileState>, ResourceError> {
        let path = self.resolve(&state.filename);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(resource = %self.name, path = %path, "Encrypted file is gone");
                return Ok(None);
            }
            Err(source) => {
                return Err(ResourceError::ReadOutput {
                    path: path.to_string(),
                    source,
                })
            }
        };

        if hex::encode(Sha256::digest(&bytes)) == state.id {
            Ok(Some(state.clone()))
        } else {
            warn!(resource = %self.name, path = %path, "Encrypted file was modified outside sopsfile");
            Ok(None)
        }
    }

    /// Remove the encrypted file; a missing file is not an error
    pub async fn delete(&self, state: &FileState) -> Result<(), ResourceError> {
        let path = self.resolve(&state.filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(resource = %self.name, path = %path, "Removed encrypted file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ResourceError::Remove {
                path: path.to_string(),
                source,
            }),
        }
    }

    fn store_pair(&self) -> Result<StorePair<'_>, ResourceError> {
        let input_type = self.config.input_type.as_deref();
        resolve_stores(&self.stores, &self.config.filename, input_type).map_err(|e| {
            ResourceError::InvalidInputType {
                value: input_type.unwrap_or_default().to_string(),
                message: e.to_string(),
            }
        })
    }

    fn resolve(&self, path: &str) -> Utf8PathBuf {
        let path = Utf8Path::new(path);
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Flatten a plaintext document into `data.*` attribute values
///
/// Nested keys are joined with `.` and list items keyed by index.
pub fn flatten_data(document: &TreeBranch) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    for item in document.iter() {
        flatten_value(&item.key, &item.value, &mut data);
    }
    data
}

fn flatten_value(prefix: &str, value: &TreeValue, data: &mut BTreeMap<String, String>) {
    match value {
        TreeValue::Branch(branch) => {
            for item in branch.iter() {
                flatten_value(&format!("{}.{}", prefix, item.key), &item.value, data);
            }
        }
        TreeValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_value(&format!("{}.{}", prefix, i), item, data);
            }
        }
        TreeValue::Null => {
            data.insert(prefix.to_string(), "null".to_string());
        }
        TreeValue::Bool(b) => {
            data.insert(prefix.to_string(), b.to_string());
        }
        TreeValue::Int(i) => {
            data.insert(prefix.to_string(), i.to_string());
        }
        TreeValue::Float(f) => {
            data.insert(prefix.to_string(), f.to_string());
        }
        TreeValue::String(s) => {
            data.insert(prefix.to_string(), s.clone());
        }
    }
}

fn input_hash(filename: &str, config: &EncryptionConfig, plaintext: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update([0]);
    hasher.update(serde_json::to_vec(config).unwrap_or_default());
    hasher.update([0]);
    hasher.update(plaintext);
    hex::encode(hasher.finalize())
}

/// Write `bytes` to `path` readable by the owner only
async fn write_private(path: &Utf8Path, bytes: &[u8]) -> Result<(), ResourceError> {
    let write_err = |source| ResourceError::WriteOutput {
        path: path.to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await.map_err(write_err)?;
    file.write_all(bytes).await.map_err(write_err)?;
    file.flush().await.map_err(write_err)?;

    // mode only applies to newly created files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(write_err)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sopsfile_engine::Format;

    fn parse(format: Format, input: &str) -> TreeBranch {
        StoreRegistry::new()
            .get(format)
            .load_plain_file(input.as_bytes())
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_flatten_scalars() {
        let document = parse(
            Format::Yaml,
            "hello: world\ninteger: 0\nfloat: 0.2\nbool: true\nnull_value: null\n",
        );
        let data = flatten_data(&document);
        assert_eq!(data["hello"], "world");
        assert_eq!(data["integer"], "0");
        assert_eq!(data["float"], "0.2");
        assert_eq!(data["bool"], "true");
        assert_eq!(data["null_value"], "null");
    }

    #[test]
    fn test_flatten_nested() {
        let document = parse(
            Format::Json,
            r#"{"db": {"user": "app", "hosts": ["a", "b"]}, "empty": {}}"#,
        );
        let data = flatten_data(&document);
        assert_eq!(data["db.user"], "app");
        assert_eq!(data["db.hosts.0"], "a");
        assert_eq!(data["db.hosts.1"], "b");
        assert!(!data.keys().any(|k| k.starts_with("empty")));
    }

    #[test]
    fn test_input_hash_changes() {
        let config = EncryptionConfig::new("age").with_age("age1abc");
        let base = input_hash("a.yaml", &config, b"a: b");
        assert_eq!(base, input_hash("a.yaml", &config, b"a: b"));
        assert_ne!(base, input_hash("a.yaml", &config, b"a: c"));
        assert_ne!(base, input_hash("b.yaml", &config, b"a: b"));
        let other = EncryptionConfig::new("age").with_age("age1def");
        assert_ne!(base, input_hash("a.yaml", &other, b"a: b"));
    }

    #[test]
    fn test_plan_action_serde() {
        assert_eq!(serde_json::to_string(&PlanAction::NoOp).unwrap(), "\"no-op\"");
        assert_eq!(serde_json::to_string(&PlanAction::Replace).unwrap(), "\"replace\"");
    }
}
