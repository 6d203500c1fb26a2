//! # sopsfile-provider
//!
//! Translation layer between declarative `sops_file` resources and the
//! encryption engine:
//! - Provider/resource configuration merge (via `sopsfile-core`)
//! - Key-provider resolution and key-group assembly
//! - The already-encrypted guard
//! - The encryption orchestrator
//! - Store resolution from filenames and format hints
//! - The resource lifecycle (create, read, delete, plan)
//!
//! ```no_run
//! use sopsfile_core::{AgeBlock, FileResourceConfig, ProviderConfig};
//! use sopsfile_provider::SopsProvider;
//!
//! # async fn run() -> Result<(), sopsfile_provider::ResourceError> {
//! let provider = SopsProvider::configure(ProviderConfig {
//!     age: Some(AgeBlock {
//!         recipients: Some("age1...".to_string()),
//!     }),
//!     ..Default::default()
//! });
//! let resource = provider.file_resource(
//!     "app",
//!     FileResourceConfig {
//!         content: Some("password: hunter2\n".to_string()),
//!         filename: "secrets/app.enc.yaml".to_string(),
//!         ..Default::default()
//!     },
//! );
//! let state = resource.create().await?;
//! println!("{}", state.id);
//! # Ok(())
//! # }
//! ```

pub mod encrypt;
pub mod error;
pub mod guard;
pub mod keys;
pub mod provider;
pub mod resource;
pub mod stores;

pub use encrypt::{encryption_rules, Encrypted, Encryptor};
pub use error::{codes, EncryptError, ResourceError};
pub use guard::{ensure_no_metadata, FileAlreadyEncrypted};
pub use keys::{build_key_groups, key_groups, resolve_master_keys, KeyResolver, MasterKeyResolver};
pub use provider::{SopsProvider, TYPE_NAME};
pub use resource::{
    flatten_data, FileResource, FileState, PlanAction, PlannedAction, RESOURCE_TYPE,
};
pub use stores::{input_format, resolve_stores, StorePair};
