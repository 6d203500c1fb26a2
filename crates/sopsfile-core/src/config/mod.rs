//! Manifest loading and the provider/resource merge layer

pub mod loader;
pub mod merge;

pub use loader::{Manifest, ManifestFile};
