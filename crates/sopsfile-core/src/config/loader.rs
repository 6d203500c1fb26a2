//! Manifest file loading and parsing

use crate::error::{Error, Result};
use crate::types::{EncryptionConfig, FileResourceConfig, ProviderConfig};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

/// Manifest file names to search for
const MANIFEST_FILE_NAMES: &[&str] = &["sopsfile.yaml", "sopsfile.yml"];

/// On-disk manifest layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestFile {
    /// Provider-level defaults
    #[serde(default)]
    pub provider: ProviderConfig,

    /// `sops_file` resources by name
    #[serde(default)]
    pub resources: BTreeMap<String, FileResourceConfig>,
}

/// Loaded manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    /// The parsed manifest
    pub manifest: ManifestFile,

    /// Path to the manifest file
    pub manifest_path: Utf8PathBuf,

    /// Directory relative paths are resolved against
    pub working_dir: Utf8PathBuf,
}

impl Manifest {
    /// Load the manifest from the specified path or search for it
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let (manifest_path, content) = if let Some(p) = path {
            let content = fs::read_to_string(p).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::config_not_found(p.as_str())
                } else {
                    Error::Io(e)
                }
            })?;
            (p.to_owned(), content)
        } else {
            Self::find_manifest()?
        };

        Self::from_content(&content, manifest_path)
    }

    /// Parse manifest content that was read from `manifest_path`
    pub fn from_content(content: &str, manifest_path: Utf8PathBuf) -> Result<Self> {
        let working_dir = manifest_path
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .map(|p| p.to_owned())
            .unwrap_or_else(|| Utf8PathBuf::from("."));

        let manifest: ManifestFile = serde_yaml_ng::from_str(content)?;

        Ok(Self {
            manifest,
            manifest_path,
            working_dir,
        })
    }

    /// Find the manifest in the current directory or parent directories
    fn find_manifest() -> Result<(Utf8PathBuf, String)> {
        let cwd = std::env::current_dir().map_err(Error::Io)?;
        let cwd = Utf8PathBuf::try_from(cwd)
            .map_err(|_| Error::invalid_config("Current directory path is not valid UTF-8"))?;

        let mut current = cwd.as_path();

        loop {
            for name in MANIFEST_FILE_NAMES {
                let path = current.join(name);
                if path.exists() {
                    let content = fs::read_to_string(&path)?;
                    return Ok((path, content));
                }
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        Err(Error::config_not_found(
            "sopsfile.yaml (searched current and parent directories)",
        ))
    }

    /// Provider-level defaults
    pub fn provider(&self) -> &ProviderConfig {
        &self.manifest.provider
    }

    /// Resources in name order
    pub fn resources(&self) -> impl Iterator<Item = (&str, &FileResourceConfig)> {
        self.manifest
            .resources
            .iter()
            .map(|(name, resource)| (name.as_str(), resource))
    }

    /// Validate every resource and its merged encryption config, collecting all errors
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        for (name, resource) in self.resources() {
            if let Err(e) = resource.validate(name) {
                errors.push(e.to_string());
                continue;
            }
            if let Err(e) = EncryptionConfig::merge(self.provider(), resource) {
                errors.push(format!("{}: {}", name, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_config(format!(
                "{} invalid resource(s):\n  - {}",
                errors.len(),
                errors.join("\n  - ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
provider:
  kms:
    arn: arn:aws:kms:us-west-2:111122223333:key/1234abcd-12ab-34cd-56ef-1234567890ab

resources:
  access-keys:
    source: fixtures/basic.yaml
    filename: out/access-keys.yml
  inline:
    content: "hello: world"
    filename: out/inline.json
    age:
      recipients: age1ql3z7hjy54pw3hyww5ayyfg7zqgvc7w3j2elw8zmrj2kg5sfn9aqmcac8p
"#;

    #[test]
    fn test_from_content() {
        let manifest =
            Manifest::from_content(MANIFEST, Utf8PathBuf::from("/work/sopsfile.yaml")).unwrap();

        assert_eq!(manifest.working_dir, Utf8PathBuf::from("/work"));
        assert!(manifest.provider().kms.is_some());

        let names: Vec<&str> = manifest.resources().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["access-keys", "inline"]);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_bare_filename_working_dir() {
        let manifest = Manifest::from_content(MANIFEST, Utf8PathBuf::from("sopsfile.yaml")).unwrap();
        assert_eq!(manifest.working_dir, Utf8PathBuf::from("."));
    }

    #[test]
    fn test_validate_collects_errors() {
        let content = r#"
resources:
  both:
    content: "a: b"
    source: a.yaml
    filename: out.yaml
  nokeys:
    content: "a: b"
    filename: out.yaml
"#;
        let manifest = Manifest::from_content(content, Utf8PathBuf::from("sopsfile.yaml")).unwrap();
        let err = manifest.validate().unwrap_err().to_string();
        assert!(err.contains("2 invalid resource(s)"));
        assert!(err.contains("mutually exclusive"));
        assert!(err.contains("No encryption provider selected"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Manifest::load(Some(Utf8Path::new("/nonexistent/sopsfile.yaml"))).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    #[serial]
    fn test_find_manifest_in_parent() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        let mut file = std::fs::File::create(temp.path().join("sopsfile.yaml")).unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();

        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(&nested).unwrap();
        let result = Manifest::load(None);
        std::env::set_current_dir(original).unwrap();

        let manifest = result.unwrap();
        assert!(manifest.manifest_path.ends_with("sopsfile.yaml"));
        assert_eq!(manifest.manifest.resources.len(), 2);
    }
}
