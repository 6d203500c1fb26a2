//! Structured file stores
//!
//! A store turns bytes into tree branches and back. Encrypted output carries
//! the metadata envelope under the `sops` key.

mod binary;
mod dotenv;
mod json;
pub mod metadata;
mod yaml;

pub use binary::BinaryStore;
pub use dotenv::DotenvStore;
pub use json::JsonStore;
pub use metadata::SopsMetadata;
pub use yaml::YamlStore;

use crate::error::{Error, Result};
use crate::tree::{Tree, TreeBranch, TreeValue, METADATA_KEY};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Yaml,
    Json,
    Dotenv,
    Binary,
}

impl Format {
    /// Format implied by a file name suffix; anything unknown is binary
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let name = path
            .as_ref()
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if name.ends_with(".yaml") || name.ends_with(".yml") {
            Format::Yaml
        } else if name.ends_with(".json") {
            Format::Json
        } else if name.ends_with(".env") {
            Format::Dotenv
        } else {
            Format::Binary
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Yaml => "yaml",
            Format::Json => "json",
            Format::Dotenv => "dotenv",
            Format::Binary => "binary",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Format::Yaml),
            "json" => Ok(Format::Json),
            "dotenv" | "env" => Ok(Format::Dotenv),
            "binary" | "raw" => Ok(Format::Binary),
            other => Err(Error::parse(
                "format",
                format!("unknown format '{}' (expected yaml, json, dotenv or binary)", other),
            )),
        }
    }
}

/// Parsing and serialization for one file format
pub trait Store: Send + Sync {
    fn format(&self) -> Format;

    /// Parse plaintext input; empty input yields no branches
    fn load_plain_file(&self, input: &[u8]) -> Result<Vec<TreeBranch>>;

    /// Serialize an encrypted tree including its metadata
    fn emit_encrypted_file(&self, tree: &Tree) -> Result<Vec<u8>>;

    /// Parse an encrypted document and its metadata
    fn load_encrypted_file(&self, input: &[u8]) -> Result<Tree>;

    /// Serialize plaintext branches
    fn emit_plain_file(&self, branches: &[TreeBranch]) -> Result<Vec<u8>>;
}

/// One instance of every store, shared read-only
pub struct StoreRegistry {
    yaml: YamlStore,
    json: JsonStore,
    dotenv: DotenvStore,
    binary: BinaryStore,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self {
            yaml: YamlStore,
            json: JsonStore,
            dotenv: DotenvStore,
            binary: BinaryStore,
        }
    }

    pub fn get(&self, format: Format) -> &dyn Store {
        match format {
            Format::Yaml => &self.yaml,
            Format::Json => &self.json,
            Format::Dotenv => &self.dotenv,
            Format::Binary => &self.binary,
        }
    }

    pub fn for_path(&self, path: impl AsRef<Path>) -> &dyn Store {
        self.get(Format::from_path(path))
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreRegistry(yaml, json, dotenv, binary)")
    }
}

fn utf8<'a>(format: &'static str, input: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(input).map_err(|e| Error::parse(format, e))
}

/// Expect a mapping at the top of a document
fn into_branch(format: &'static str, value: TreeValue) -> Result<TreeBranch> {
    match value {
        TreeValue::Branch(branch) => Ok(branch),
        other => Err(Error::parse(
            format,
            format!("top-level value must be a mapping, found {}", kind(&other)),
        )),
    }
}

fn kind(value: &TreeValue) -> &'static str {
    match value {
        TreeValue::Null => "null",
        TreeValue::Bool(_) => "a boolean",
        TreeValue::Int(_) | TreeValue::Float(_) => "a number",
        TreeValue::String(_) => "a string",
        TreeValue::Array(_) => "a sequence",
        TreeValue::Branch(_) => "a mapping",
    }
}

/// Copy of `branch` with the metadata envelope appended; a document that
/// already has a top-level `sops` key cannot carry the envelope
fn with_metadata(format: &'static str, branch: &TreeBranch, tree: &Tree) -> Result<TreeBranch> {
    if branch.contains_key(METADATA_KEY) {
        return Err(Error::emit(
            format,
            format!("document already has a top-level '{}' key", METADATA_KEY),
        ));
    }
    let metadata = SopsMetadata::from_metadata(&tree.metadata)?.to_tree_value(format)?;
    let mut branch = branch.clone();
    branch.insert(METADATA_KEY, metadata);
    Ok(branch)
}

/// Strip the metadata envelope from the first branch and rebuild the tree
fn split_metadata(format: &'static str, mut branches: Vec<TreeBranch>) -> Result<Tree> {
    let metadata = branches
        .first_mut()
        .and_then(|branch| branch.remove(METADATA_KEY))
        .ok_or(Error::MetadataNotFound)?;
    for branch in branches.iter_mut().skip(1) {
        branch.remove(METADATA_KEY);
    }

    let metadata = SopsMetadata::from_tree_value(format, metadata)?.into_metadata()?;
    Ok(Tree::new(branches, metadata, String::new()))
}
