//! Recorded resource state, kept next to the manifest

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sopsfile_provider::FileState;
use std::collections::BTreeMap;

/// State file name
pub const STATE_FILE_NAME: &str = ".sopsfile.state.json";

const STATE_VERSION: u32 = 1;

/// On-disk state layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,

    /// Created resources by name
    #[serde(default)]
    pub resources: BTreeMap<String, FileState>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            resources: BTreeMap::new(),
        }
    }
}

/// State file bound to its path
#[derive(Debug)]
pub struct StateStore {
    path: Utf8PathBuf,
    state: StateFile,
}

impl StateStore {
    /// State for the manifest in `dir`; a missing file is empty state
    pub fn load(dir: &Utf8Path) -> Result<Self> {
        let path = dir.join(STATE_FILE_NAME);
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse state file {}", path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateFile::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read state file {}", path))
            }
        };

        if state.version != STATE_VERSION {
            anyhow::bail!(
                "Unsupported state version {} in {} (expected {})",
                state.version,
                path,
                STATE_VERSION
            );
        }

        tracing::debug!(path = %path, resources = state.resources.len(), "Loaded state");
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&FileState> {
        self.state.resources.get(name)
    }

    pub fn resources(&self) -> &BTreeMap<String, FileState> {
        &self.state.resources
    }

    pub fn insert(&mut self, name: impl Into<String>, state: FileState) {
        self.state.resources.insert(name.into(), state);
    }

    pub fn remove(&mut self, name: &str) -> Option<FileState> {
        self.state.resources.remove(name)
    }

    /// Write the state back; the file is removed once nothing is recorded
    pub fn save(&self) -> Result<()> {
        if self.state.resources.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e)
                    .with_context(|| format!("Failed to remove state file {}", self.path)),
                _ => Ok(()),
            };
        }

        let content = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.path, content + "\n")
            .with_context(|| format!("Failed to write state file {}", self.path))?;

        // State holds plaintext-derived attributes
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict state file {}", self.path))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap()
    }

    fn file_state(filename: &str) -> FileState {
        FileState {
            id: "00".repeat(32),
            filename: filename.to_string(),
            encrypted_content: "a: ENC[...]\n".to_string(),
            data: BTreeMap::new(),
            input_hash: "11".repeat(32),
        }
    }

    #[test]
    fn test_missing_state_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::load(&dir(&temp)).unwrap();
        assert!(store.resources().is_empty());
        assert_eq!(store.path(), dir(&temp).join(STATE_FILE_NAME));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let mut store = StateStore::load(&dir(&temp)).unwrap();
        store.insert("app", file_state("app.enc.yaml"));
        store.save().unwrap();

        let reloaded = StateStore::load(&dir(&temp)).unwrap();
        assert_eq!(reloaded.get("app"), Some(&file_state("app.enc.yaml")));

        let mut reloaded = reloaded;
        reloaded.remove("app");
        reloaded.save().unwrap();
        assert!(!temp.path().join(STATE_FILE_NAME).exists());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(STATE_FILE_NAME),
            r#"{"version": 99, "resources": {}}"#,
        )
        .unwrap();
        let err = StateStore::load(&dir(&temp)).unwrap_err();
        assert!(err.to_string().contains("Unsupported state version 99"));
    }
}
