//! dotenv files
//!
//! Plaintext input is read line by line as literal `KEY=value` pairs; no
//! variable substitution happens. Single-quoted values are taken verbatim,
//! double-quoted values understand `\\`, `\"` and `\n`.
//!
//! The encrypted form is a flat `KEY=value` list with backslashes and
//! newlines escaped and the metadata flattened into `sops_`-prefixed keys:
//! nested map keys become `__map_<key>`, list items `__list_<index>`.

use super::{utf8, Format, SopsMetadata, Store};
use crate::error::{Error, Result};
use crate::tree::{Tree, TreeBranch, TreeValue};

const FORMAT: &str = "dotenv";

const METADATA_PREFIX: &str = "sops_";

#[derive(Debug, Clone, Copy, Default)]
pub struct DotenvStore;

impl DotenvStore {
    fn single(branches: &[TreeBranch]) -> Result<&TreeBranch> {
        match branches {
            [branch] => Ok(branch),
            _ => Err(Error::emit(
                FORMAT,
                format!("expected exactly one document, found {}", branches.len()),
            )),
        }
    }

    fn scalar(key: &str, value: &TreeValue) -> Result<String> {
        match value {
            TreeValue::String(s) => Ok(s.clone()),
            TreeValue::Int(i) => Ok(i.to_string()),
            TreeValue::Float(f) => Ok(f.to_string()),
            TreeValue::Bool(b) => Ok(b.to_string()),
            TreeValue::Null => Ok(String::new()),
            TreeValue::Array(_) | TreeValue::Branch(_) => Err(Error::emit(
                FORMAT,
                format!("'{}' is nested; dotenv values must be scalars", key),
            )),
        }
    }
}

impl Store for DotenvStore {
    fn format(&self) -> Format {
        Format::Dotenv
    }

    fn load_plain_file(&self, input: &[u8]) -> Result<Vec<TreeBranch>> {
        let mut branch = TreeBranch::new();
        for (key, value) in entries(utf8(FORMAT, input)?)? {
            branch.insert(key, TreeValue::String(parse_value(value)));
        }

        if branch.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![branch])
        }
    }

    fn emit_encrypted_file(&self, tree: &Tree) -> Result<Vec<u8>> {
        let branch = Self::single(&tree.branches)?;
        let mut out = String::new();
        for item in branch.iter() {
            if item.key.starts_with(METADATA_PREFIX) {
                return Err(Error::emit(
                    FORMAT,
                    format!("'{}' clashes with the '{}' metadata keys", item.key, METADATA_PREFIX),
                ));
            }
            let value = Self::scalar(&item.key, &item.value)?;
            out.push_str(&format!("{}={}\n", item.key, escape(&value)));
        }

        let metadata = SopsMetadata::from_metadata(&tree.metadata)?.to_tree_value(FORMAT)?;
        let mut flat = Vec::new();
        flatten("", &metadata, &mut flat);
        for (key, value) in flat {
            out.push_str(&format!("{}{}={}\n", METADATA_PREFIX, key, escape(&value)));
        }

        Ok(out.into_bytes())
    }

    fn load_encrypted_file(&self, input: &[u8]) -> Result<Tree> {
        let mut branch = TreeBranch::new();
        let mut metadata = TreeValue::Branch(TreeBranch::new());
        let mut found = false;

        for (key, value) in entries(utf8(FORMAT, input)?)? {
            let value = unescape(value);
            match key.strip_prefix(METADATA_PREFIX) {
                Some(flat_key) => {
                    found = true;
                    let segments = parse_segments(flat_key)?;
                    insert_at(&mut metadata, &segments, value);
                }
                None => branch.insert(key, TreeValue::String(value)),
            }
        }

        if !found {
            return Err(Error::MetadataNotFound);
        }

        let metadata = SopsMetadata::from_tree_value(FORMAT, metadata)?.into_metadata()?;
        Ok(Tree::new(vec![branch], metadata, String::new()))
    }

    fn emit_plain_file(&self, branches: &[TreeBranch]) -> Result<Vec<u8>> {
        let branch = Self::single(branches)?;
        let mut out = String::new();
        for item in branch.iter() {
            let value = Self::scalar(&item.key, &item.value)?;
            out.push_str(&format!("{}={}\n", item.key, quote(&value)));
        }
        Ok(out.into_bytes())
    }
}

/// `KEY=value` pairs of a dotenv file; blank lines and `#` comments are
/// skipped and values are returned exactly as written
fn entries(text: &str) -> Result<Vec<(&str, &str)>> {
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .map(|(key, value)| (key.trim(), value))
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| {
                Error::parse(FORMAT, format!("invalid line {}: '{}'", idx + 1, trimmed))
            })?;
        entries.push((key, value));
    }
    Ok(entries)
}

/// Plaintext value with surrounding whitespace and quotes removed
fn parse_value(value: &str) -> String {
    let value = value.trim();
    let quoted = |quote: char| {
        value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote)
    };
    if quoted('\'') {
        value[1..value.len() - 1].to_string()
    } else if quoted('"') {
        unescape(&value[1..value.len() - 1])
    } else {
        value.to_string()
    }
}

/// Quote a value so [`parse_value`] reads it back unchanged
fn quote(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-.,:/@+%".contains(c));
    if plain {
        return value.to_string();
    }
    if !value.contains('\'') && !value.contains('\n') {
        return format!("'{}'", value);
    }
    format!("\"{}\"", escape(value).replace('"', "\\\""))
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Reverse [`escape`]; `\"` becomes `"` and unknown escapes are kept as written
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn flatten(prefix: &str, value: &TreeValue, out: &mut Vec<(String, String)>) {
    let join = |segment: String| {
        if prefix.is_empty() {
            segment
        } else {
            format!("{}__{}", prefix, segment)
        }
    };

    match value {
        TreeValue::Branch(branch) => {
            for item in branch.iter() {
                let key = if prefix.is_empty() {
                    item.key.clone()
                } else {
                    join(format!("map_{}", item.key))
                };
                flatten(&key, &item.value, out);
            }
        }
        TreeValue::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten(&join(format!("list_{}", index)), item, out);
            }
        }
        TreeValue::Null => {}
        TreeValue::String(s) => out.push((prefix.to_string(), s.clone())),
        TreeValue::Int(i) => out.push((prefix.to_string(), i.to_string())),
        TreeValue::Float(f) => out.push((prefix.to_string(), f.to_string())),
        TreeValue::Bool(b) => out.push((prefix.to_string(), b.to_string())),
    }
}

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn parse_segments(flat_key: &str) -> Result<Vec<Segment<'_>>> {
    let mut parts = flat_key.split("__");
    let mut segments = vec![Segment::Key(parts.next().unwrap_or_default())];
    for part in parts {
        if let Some(key) = part.strip_prefix("map_") {
            segments.push(Segment::Key(key));
        } else if let Some(index) = part.strip_prefix("list_") {
            let index = index.parse().map_err(|_| {
                Error::InvalidMetadata(format!("bad list index in '{}'", flat_key))
            })?;
            segments.push(Segment::Index(index));
        } else {
            return Err(Error::InvalidMetadata(format!(
                "unexpected segment '{}' in '{}'",
                part, flat_key
            )));
        }
    }
    Ok(segments)
}

fn insert_at(target: &mut TreeValue, segments: &[Segment<'_>], value: String) {
    let Some((head, rest)) = segments.split_first() else {
        *target = TreeValue::String(value);
        return;
    };

    match head {
        Segment::Key(key) => {
            if !matches!(target, TreeValue::Branch(_)) {
                *target = TreeValue::Branch(TreeBranch::new());
            }
            if let TreeValue::Branch(branch) = target {
                insert_at(branch.entry(key), rest, value);
            }
        }
        Segment::Index(index) => {
            if !matches!(target, TreeValue::Array(_)) {
                *target = TreeValue::Array(Vec::new());
            }
            if let TreeValue::Array(items) = target {
                if items.len() <= *index {
                    items.resize(*index + 1, TreeValue::Null);
                }
                insert_at(&mut items[*index], rest, value);
            }
        }
    }
}
