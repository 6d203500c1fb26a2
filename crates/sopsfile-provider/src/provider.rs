//! The `sops` provider: shared defaults and the store registry

use crate::encrypt::Encryptor;
use crate::keys::{KeyResolver, MasterKeyResolver};
use crate::resource::FileResource;
use sopsfile_core::{FileResourceConfig, ProviderConfig};
use sopsfile_engine::StoreRegistry;
use std::sync::Arc;
use tracing::{debug, info_span, Span};

/// Provider type name
pub const TYPE_NAME: &str = "sops";

/// A configured provider instance
///
/// Cloning is cheap; configuration and stores are shared and never mutated.
#[derive(Debug, Clone)]
pub struct SopsProvider {
    config: Arc<ProviderConfig>,
    stores: Arc<StoreRegistry>,
    span: Span,
}

impl SopsProvider {
    /// Provider with no defaults
    pub fn new() -> Self {
        Self::configure(ProviderConfig::default())
    }

    /// Provider with the given provider-level defaults
    pub fn configure(config: ProviderConfig) -> Self {
        let span = info_span!(target: "sops", "sops", provider = TYPE_NAME);
        debug!(
            parent: &span,
            declared = ?config.declared_providers(),
            default = ?config.encryption_provider,
            "Configured provider"
        );
        Self {
            config: Arc::new(config),
            stores: Arc::new(StoreRegistry::new()),
            span,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn stores(&self) -> &StoreRegistry {
        &self.stores
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// A `sops_file` resource bound to this provider
    pub fn file_resource(
        &self,
        name: impl Into<String>,
        config: FileResourceConfig,
    ) -> FileResource<MasterKeyResolver> {
        self.file_resource_with_resolver(name, config, MasterKeyResolver)
    }

    /// A `sops_file` resource that resolves keys through `resolver`
    pub fn file_resource_with_resolver<R: KeyResolver>(
        &self,
        name: impl Into<String>,
        config: FileResourceConfig,
        resolver: R,
    ) -> FileResource<R> {
        let name = name.into();
        let span = info_span!(target: "sops", parent: &self.span, "sops_file", resource = %name);
        FileResource::new(
            name,
            config,
            Arc::clone(&self.config),
            Arc::clone(&self.stores),
            Encryptor::with_resolver(resolver, span),
        )
    }
}

impl Default for SopsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sopsfile_core::KmsBlock;

    #[test]
    fn test_configure_shares_state() {
        let provider = SopsProvider::configure(ProviderConfig {
            kms: Some(KmsBlock {
                arn: Some("arn:aws:kms:us-east-1:111122223333:key/a".to_string()),
                profile: None,
            }),
            ..Default::default()
        });
        let clone = provider.clone();
        assert!(std::ptr::eq(provider.config(), clone.config()));
        assert!(std::ptr::eq(provider.stores(), clone.stores()));
        assert!(provider.config().kms.is_some());
    }

    #[test]
    fn test_file_resource_binding() {
        let provider = SopsProvider::new();
        let resource = provider.file_resource(
            "app",
            FileResourceConfig {
                content: Some("a: b".to_string()),
                filename: "app.enc.yaml".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(resource.name(), "app");
        assert_eq!(resource.config().filename, "app.enc.yaml");
    }
}
