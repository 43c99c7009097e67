// template.rs - `__KEY__` placeholder substitution for generated build files.
//
// Values bound with `literal` land inside quoted Kotlin strings, so they are
// rejected if they contain anything that could close the string or start an
// interpolation. `fragment` values are trusted text produced by another
// template and are inserted verbatim.

use std::collections::BTreeMap;

use regex::{Captures, Regex};
use thiserror::Error;

/// Matches `__MODULE__`, `__IMP_DETAILS__`, ...
const PLACEHOLDER_PATTERN: &str = r"__([A-Z][A-Z0-9]*(?:_[A-Z0-9]+)*)__";

/// Characters that would break out of a Kotlin string literal.
const UNSAFE_CHARS: &[char] = &['"', '\\', '$', '\n', '\r'];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("value for __{key}__ contains {found:?}, which would break the generated file")]
    UnsafeValue { key: String, found: char },

    #[error("unresolved template placeholders: {}", .0.join(", "))]
    Unresolved(Vec<String>),

    #[error("invalid placeholder pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A template plus the values bound to its placeholders.
#[derive(Debug)]
pub struct Template<'a> {
    source: &'a str,
    values: BTreeMap<&'a str, String>,
}

impl<'a> Template<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            values: BTreeMap::new(),
        }
    }

    /// Bind a value that is placed inside a quoted string literal.
    pub fn literal(mut self, key: &'a str, value: &str) -> Result<Self, TemplateError> {
        if let Some(found) = value.chars().find(|c| UNSAFE_CHARS.contains(c)) {
            return Err(TemplateError::UnsafeValue {
                key: key.to_string(),
                found,
            });
        }
        self.values.insert(key, value.to_string());
        Ok(self)
    }

    /// Bind trusted text, inserted as-is.
    pub fn fragment(mut self, key: &'a str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    /// Substitute every placeholder in a single pass.
    ///
    /// Placeholders without a bound value are an error; substituted values
    /// are never scanned again.
    pub fn render(&self) -> Result<String, TemplateError> {
        let pattern = Regex::new(PLACEHOLDER_PATTERN)?;
        let mut unresolved = Vec::new();

        let rendered = pattern.replace_all(self.source, |caps: &Captures| {
            match self.values.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    unresolved.push(caps[1].to_string());
                    caps[0].to_string()
                }
            }
        });

        if !unresolved.is_empty() {
            unresolved.sort();
            unresolved.dedup();
            return Err(TemplateError::Unresolved(unresolved));
        }

        Ok(rendered.into_owned())
    }
}
