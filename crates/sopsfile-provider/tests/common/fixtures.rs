//! Key and plaintext fixtures

use age::x25519::Identity;
use sopsfile_core::EncryptionConfig;
use sopsfile_engine::{Keyring, Store, TreeBranch};
use std::path::PathBuf;

/// Fresh age identity and its recipient string
pub fn age_keypair() -> (Identity, String) {
    let identity = Identity::generate();
    let recipient = identity.to_public().to_string();
    (identity, recipient)
}

/// Effective config encrypting to one age recipient
pub fn age_config(recipient: &str) -> EncryptionConfig {
    EncryptionConfig::new("age").with_age(recipient)
}

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Contents of a file under tests/fixtures
pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).unwrap()
}

/// Decrypt `encrypted` with `identity` and return its documents
pub async fn decrypt(store: &dyn Store, encrypted: &[u8], identity: &Identity) -> Vec<TreeBranch> {
    let mut tree = store.load_encrypted_file(encrypted).unwrap();
    let keyring = Keyring::new().with_age_identity(identity.clone());
    let data_key = tree.data_key(&keyring).await.unwrap();
    tree.decrypt(&data_key).unwrap();
    tree.branches
}
