//! Refuse documents that already carry a metadata envelope

use sopsfile_engine::{TreeBranch, METADATA_KEY};
use std::fmt;

/// Column at which the long-form message is wrapped
const WRAP_WIDTH: usize = 75;

const USER_MESSAGE: &str = "The file you have provided contains a top-level entry called \
'sops'. This is generally due to the file already being encrypted. \
SOPS uses a top-level entry called 'sops' to store the metadata \
required to decrypt the file. For this reason, SOPS can not \
encrypt files that already contain such an entry.\n\n\
If this is an unencrypted file, rename the 'sops' entry.\n\n\
If this is an encrypted file and you want to edit it, use the \
editor mode, for example: `sops my_file.yaml`";

/// The first branch has a top-level `sops` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileAlreadyEncrypted;

impl FileAlreadyEncrypted {
    /// Explanation for terminal display, wrapped at 75 columns
    pub fn user_error(&self) -> String {
        wrap(USER_MESSAGE, WRAP_WIDTH)
    }
}

impl fmt::Display for FileAlreadyEncrypted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("File already encrypted")
    }
}

impl std::error::Error for FileAlreadyEncrypted {}

/// Check the direct keys of a branch for the metadata entry
pub fn ensure_no_metadata(branch: &TreeBranch) -> Result<(), FileAlreadyEncrypted> {
    if branch.iter().any(|item| item.key == METADATA_KEY) {
        Err(FileAlreadyEncrypted)
    } else {
        Ok(())
    }
}

/// Greedy word wrap; existing line breaks are kept and long words are not split
fn wrap(text: &str, width: usize) -> String {
    text.split('\n')
        .map(|line| {
            let mut wrapped = String::new();
            let mut current = 0;
            for word in line.split(' ').filter(|w| !w.is_empty()) {
                if current > 0 && current + 1 + word.len() > width {
                    wrapped.push('\n');
                    current = 0;
                } else if current > 0 {
                    wrapped.push(' ');
                    current += 1;
                }
                wrapped.push_str(word);
                current += word.len();
            }
            wrapped
        })
        .collect::<Vec<_>>()
        .join("\n")
}
