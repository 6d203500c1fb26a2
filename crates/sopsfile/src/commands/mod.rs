//! CLI command implementations

pub mod apply;
pub mod destroy;
pub mod plan;
pub mod status;
pub mod validate;

use anyhow::{Context, Result};
use camino::Utf8Path;
use sopsfile_core::{FileResourceConfig, Manifest};
use sopsfile_provider::{FileResource, FileState, SopsProvider};

use crate::state::StateStore;

/// Manifest, provider and recorded state for one command run
pub struct Workspace {
    pub manifest: Manifest,
    pub provider: SopsProvider,
    pub state: StateStore,
}

impl Workspace {
    pub fn load(config: Option<&Utf8Path>) -> Result<Self> {
        let manifest = Manifest::load(config).context("Failed to load manifest")?;
        let provider = SopsProvider::configure(manifest.provider().clone());
        let state = StateStore::load(&manifest.working_dir)?;
        Ok(Self {
            manifest,
            provider,
            state,
        })
    }

    /// A declared resource bound to the manifest directory
    pub fn resource(&self, name: &str, config: &FileResourceConfig) -> FileResource {
        self.provider
            .file_resource(name, config.clone())
            .with_base_dir(self.manifest.working_dir.clone())
    }

    /// A resource known only from state, enough to read or delete its file
    pub fn recorded(&self, name: &str, state: &FileState) -> FileResource {
        let config = FileResourceConfig {
            filename: state.filename.clone(),
            ..Default::default()
        };
        self.resource(name, &config)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.manifest.manifest.resources.contains_key(name)
    }

    /// Fail on target names that are neither declared nor recorded
    pub fn check_targets(&self, targets: &[String]) -> Result<()> {
        let unknown: Vec<&str> = targets
            .iter()
            .map(String::as_str)
            .filter(|t| !self.is_declared(t) && self.state.get(t).is_none())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Unknown resource(s): {}", unknown.join(", "))
        }
    }

    /// Recorded resources that are no longer declared
    pub fn orphans(&self) -> Vec<(String, FileState)> {
        self.state
            .resources()
            .iter()
            .filter(|(name, _)| !self.is_declared(name))
            .map(|(name, state)| (name.clone(), state.clone()))
            .collect()
    }
}

/// Whether `name` is selected by `targets`; no targets selects everything
pub fn selected(targets: &[String], name: &str) -> bool {
    targets.is_empty() || targets.iter().any(|t| t == name)
}
