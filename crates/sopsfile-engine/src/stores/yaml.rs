use super::{into_branch, split_metadata, utf8, with_metadata, Format, Store};
use crate::error::{Error, Result};
use crate::tree::{Tree, TreeBranch, TreeValue};
use serde::Deserialize;

const FORMAT: &str = "yaml";

/// Multi-document YAML; every document becomes a branch
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlStore;

impl YamlStore {
    fn parse(input: &[u8]) -> Result<Vec<TreeBranch>> {
        let text = utf8(FORMAT, input)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut branches = Vec::new();
        for document in serde_yaml_ng::Deserializer::from_str(text) {
            match TreeValue::deserialize(document).map_err(|e| Error::parse(FORMAT, e))? {
                TreeValue::Null => continue,
                value => branches.push(into_branch(FORMAT, value)?),
            }
        }
        Ok(branches)
    }

    fn emit(branches: &[TreeBranch]) -> Result<Vec<u8>> {
        let documents = branches
            .iter()
            .map(|branch| serde_yaml_ng::to_string(branch).map_err(|e| Error::emit(FORMAT, e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(documents.join("---\n").into_bytes())
    }
}

impl Store for YamlStore {
    fn format(&self) -> Format {
        Format::Yaml
    }

    fn load_plain_file(&self, input: &[u8]) -> Result<Vec<TreeBranch>> {
        Self::parse(input)
    }

    fn emit_encrypted_file(&self, tree: &Tree) -> Result<Vec<u8>> {
        let branches = tree
            .branches
            .iter()
            .map(|branch| with_metadata(FORMAT, branch, tree))
            .collect::<Result<Vec<_>>>()?;
        Self::emit(&branches)
    }

    fn load_encrypted_file(&self, input: &[u8]) -> Result<Tree> {
        split_metadata(FORMAT, Self::parse(input)?)
    }

    fn emit_plain_file(&self, branches: &[TreeBranch]) -> Result<Vec<u8>> {
        Self::emit(branches)
    }
}
