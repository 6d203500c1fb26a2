//! Selective encryption rules
//!
//! At most one rule may be set. A rule is checked against every key on the
//! path from the document root to a leaf, so marking a branch key also covers
//! everything below it.

use crate::error::{Error, Result};
use regex::Regex;

/// Suffix used when no rule is configured
pub const DEFAULT_UNENCRYPTED_SUFFIX: &str = "_unencrypted";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionRules {
    pub unencrypted_suffix: Option<String>,
    pub encrypted_suffix: Option<String>,
    pub unencrypted_regex: Option<String>,
    pub encrypted_regex: Option<String>,
}

impl EncryptionRules {
    /// Fill in the default unencrypted suffix when nothing is configured
    pub fn with_defaults(mut self) -> Self {
        if self.set_rules().is_empty() {
            self.unencrypted_suffix = Some(DEFAULT_UNENCRYPTED_SUFFIX.to_string());
        }
        self
    }

    fn set_rules(&self) -> Vec<&'static str> {
        [
            (&self.unencrypted_suffix, "unencrypted_suffix"),
            (&self.encrypted_suffix, "encrypted_suffix"),
            (&self.unencrypted_regex, "unencrypted_regex"),
            (&self.encrypted_regex, "encrypted_regex"),
        ]
        .into_iter()
        .filter(|(value, _)| value.as_deref().is_some_and(|v| !v.is_empty()))
        .map(|(_, name)| name)
        .collect()
    }

    /// Validate the rules and build a matcher
    pub fn compile(&self) -> Result<KeyMatcher> {
        let set = self.set_rules();
        if set.len() > 1 {
            return Err(Error::InvalidRules(format!(
                "only one of {} may be set",
                set.join(", ")
            )));
        }

        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| Error::InvalidRules(format!("invalid regex '{}': {}", pattern, e)))
        };

        let matcher = match set.first().copied() {
            Some("unencrypted_suffix") => {
                KeyMatcher::UnencryptedSuffix(self.unencrypted_suffix.clone().unwrap_or_default())
            }
            Some("encrypted_suffix") => {
                KeyMatcher::EncryptedSuffix(self.encrypted_suffix.clone().unwrap_or_default())
            }
            Some("unencrypted_regex") => KeyMatcher::UnencryptedRegex(compile(
                self.unencrypted_regex.as_deref().unwrap_or_default(),
            )?),
            Some("encrypted_regex") => KeyMatcher::EncryptedRegex(compile(
                self.encrypted_regex.as_deref().unwrap_or_default(),
            )?),
            _ => KeyMatcher::UnencryptedSuffix(DEFAULT_UNENCRYPTED_SUFFIX.to_string()),
        };

        Ok(matcher)
    }
}

/// Compiled form of [`EncryptionRules`]
#[derive(Debug, Clone)]
pub enum KeyMatcher {
    UnencryptedSuffix(String),
    EncryptedSuffix(String),
    UnencryptedRegex(Regex),
    EncryptedRegex(Regex),
}

impl KeyMatcher {
    /// Whether the leaf at `path` is encrypted
    pub fn should_encrypt(&self, path: &[String]) -> bool {
        match self {
            KeyMatcher::UnencryptedSuffix(suffix) => !path.iter().any(|k| k.ends_with(suffix)),
            KeyMatcher::EncryptedSuffix(suffix) => path.iter().any(|k| k.ends_with(suffix)),
            KeyMatcher::UnencryptedRegex(re) => !path.iter().any(|k| re.is_match(k)),
            KeyMatcher::EncryptedRegex(re) => path.iter().any(|k| re.is_match(k)),
        }
    }
}
