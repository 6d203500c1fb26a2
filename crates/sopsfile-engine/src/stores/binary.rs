use super::json::JsonStore;
use super::{split_metadata, with_metadata, Format, Store};
use crate::error::{Error, Result};
use crate::tree::{Tree, TreeBranch, TreeValue};

const FORMAT: &str = "binary";

/// Key holding the whole file content
pub const DATA_KEY: &str = "data";

/// Arbitrary file content stored as a single `data` value; the encrypted
/// form is JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryStore;

impl Store for BinaryStore {
    fn format(&self) -> Format {
        Format::Binary
    }

    fn load_plain_file(&self, input: &[u8]) -> Result<Vec<TreeBranch>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let content = String::from_utf8(input.to_vec())
            .map_err(|_| Error::parse(FORMAT, "content is not valid UTF-8"))?;

        let mut branch = TreeBranch::new();
        branch.insert(DATA_KEY, TreeValue::String(content));
        Ok(vec![branch])
    }

    fn emit_encrypted_file(&self, tree: &Tree) -> Result<Vec<u8>> {
        let branch = JsonStore::single(FORMAT, &tree.branches)?;
        JsonStore::emit(FORMAT, &with_metadata(FORMAT, branch, tree)?)
    }

    fn load_encrypted_file(&self, input: &[u8]) -> Result<Tree> {
        split_metadata(FORMAT, JsonStore::parse(FORMAT, input)?)
    }

    fn emit_plain_file(&self, branches: &[TreeBranch]) -> Result<Vec<u8>> {
        let branch = JsonStore::single(FORMAT, branches)?;
        match branch.get(DATA_KEY) {
            Some(TreeValue::String(content)) => Ok(content.clone().into_bytes()),
            _ => Err(Error::emit(FORMAT, "no string 'data' entry found")),
        }
    }
}
