//! Store resolution from a target filename and an optional format hint

use sopsfile_engine::{Format, Store, StoreRegistry};
use std::fmt;

/// Hint value that defers to the filename
const FORMAT_FROM_FILENAME: &str = "file";

/// Stores used by one encryption operation
#[derive(Clone, Copy)]
pub struct StorePair<'a> {
    pub input: &'a dyn Store,
    pub output: &'a dyn Store,
}

impl fmt::Debug for StorePair<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorePair")
            .field("input", &self.input.format())
            .field("output", &self.output.format())
            .finish()
    }
}

/// Input format: the hint when given, otherwise the filename's
pub fn input_format(filename: &str, input_type: Option<&str>) -> sopsfile_engine::Result<Format> {
    match input_type.map(str::trim) {
        Some(hint) if !hint.is_empty() && hint != FORMAT_FROM_FILENAME => hint.parse(),
        _ => Ok(Format::from_path(filename)),
    }
}

/// Pick the input and output stores for a target file
///
/// The output store always follows the filename.
pub fn resolve_stores<'a>(
    registry: &'a StoreRegistry,
    filename: &str,
    input_type: Option<&str>,
) -> sopsfile_engine::Result<StorePair<'a>> {
    Ok(StorePair {
        input: registry.get(input_format(filename, input_type)?),
        output: registry.for_path(filename),
    })
}
