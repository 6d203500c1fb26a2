use super::{into_branch, split_metadata, utf8, with_metadata, Format, Store};
use crate::error::{Error, Result};
use crate::tree::{Tree, TreeBranch, TreeValue};

const FORMAT: &str = "json";

/// A single JSON object
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStore;

impl JsonStore {
    pub(super) fn parse(format: &'static str, input: &[u8]) -> Result<Vec<TreeBranch>> {
        let text = utf8(format, input)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value: TreeValue = serde_json::from_str(text).map_err(|e| Error::parse(format, e))?;
        Ok(vec![into_branch(format, value)?])
    }

    pub(super) fn emit(format: &'static str, branch: &TreeBranch) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(branch).map_err(|e| Error::emit(format, e))?;
        out.push(b'\n');
        Ok(out)
    }

    pub(super) fn single<'a>(
        format: &'static str,
        branches: &'a [TreeBranch],
    ) -> Result<&'a TreeBranch> {
        match branches {
            [branch] => Ok(branch),
            _ => Err(Error::emit(
                format,
                format!("expected exactly one document, found {}", branches.len()),
            )),
        }
    }
}

impl Store for JsonStore {
    fn format(&self) -> Format {
        Format::Json
    }

    fn load_plain_file(&self, input: &[u8]) -> Result<Vec<TreeBranch>> {
        Self::parse(FORMAT, input)
    }

    fn emit_encrypted_file(&self, tree: &Tree) -> Result<Vec<u8>> {
        let branch = Self::single(FORMAT, &tree.branches)?;
        Self::emit(FORMAT, &with_metadata(FORMAT, branch, tree)?)
    }

    fn load_encrypted_file(&self, input: &[u8]) -> Result<Tree> {
        split_metadata(FORMAT, Self::parse(FORMAT, input)?)
    }

    fn emit_plain_file(&self, branches: &[TreeBranch]) -> Result<Vec<u8>> {
        Self::emit(FORMAT, Self::single(FORMAT, branches)?)
    }
}
