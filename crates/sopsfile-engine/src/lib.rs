//! sopsfile-engine - tree-based document encryption
//!
//! Documents are parsed by a [`Store`] into a [`Tree`] of ordered branches.
//! A random data key encrypts every eligible leaf; the data key itself is
//! wrapped by each master key (AWS KMS, PGP, age) and kept in the metadata
//! envelope written next to the document.
//!
//! # Example
//!
//! ```no_run
//! use sopsfile_engine::{Cipher, EncryptionRules, Metadata, StoreRegistry, Format, Tree};
//! use sopsfile_engine::keys::{AgeMasterKey, MasterKey};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let stores = StoreRegistry::new();
//! let store = stores.get(Format::Yaml);
//! let branches = store.load_plain_file(b"password: hunter2\n")?;
//!
//! let key = AgeMasterKey::new("age1ql3z7hjy54pw3hyww5ayyfg7zqgvc7w3j2elw8zmrj2kg5sfn9aqmcac8p")?;
//! let groups = vec![vec![Box::new(key) as Box<dyn MasterKey>]];
//! let mut tree = Tree::new(branches, Metadata::new(groups, EncryptionRules::default(), 0), "/tmp/x.yaml");
//!
//! let data_key = tree.generate_data_key().await.map_err(|_| "no data key")?;
//! tree.encrypt(&data_key, Cipher::default())?;
//! let encrypted = store.emit_encrypted_file(&tree)?;
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod error;
pub mod keys;
pub mod rules;
pub mod stores;
pub mod tree;

pub use cipher::Cipher;
pub use error::{format_key_errors, Error, KeyError, Result};
pub use keys::{KeyGroup, Keyring, MasterKey};
pub use rules::EncryptionRules;
pub use stores::{Format, Store, StoreRegistry};
pub use tree::{Metadata, Tree, TreeBranch, TreeItem, TreeValue, METADATA_KEY};

/// Version stamped into the metadata of every encrypted document
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
