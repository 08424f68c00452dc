// src/error.rs

use std::error::Error;
use std::fmt;

/// Boxed error type returned by every fallible operation in the crate.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Raised when label-addressed access names rows or columns that do not exist.
///
/// All missing names on both axes are collected before the error is raised,
/// so callers see the complete list in a single failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameLookupError {
    pub context: String,
    pub missing_rows: Vec<String>,
    pub missing_cols: Vec<String>,
}

impl NameLookupError {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            missing_rows: Vec::new(),
            missing_cols: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.missing_rows.is_empty() && self.missing_cols.is_empty()
    }

    /// Every missing name, rows first.
    pub fn all_missing(&self) -> impl Iterator<Item = &str> {
        self.missing_rows
            .iter()
            .chain(self.missing_cols.iter())
            .map(String::as_str)
    }

    /// Returns `Err(self)` if anything was recorded.
    pub fn into_result(self) -> Result<(), ThreadSafeStdError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Box::new(self))
        }
    }
}

impl fmt::Display for NameLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: names not found", self.context)?;
        if !self.missing_rows.is_empty() {
            write!(f, "; rows: {}", self.missing_rows.join(","))?;
        }
        if !self.missing_cols.is_empty() {
            write!(f, "; cols: {}", self.missing_cols.join(","))?;
        }
        Ok(())
    }
}

impl Error for NameLookupError {}

/// Upper-cases a label and trims surrounding whitespace.
pub fn normalize_label(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Returns the labels that occur more than once, each reported once, in order of first repeat.
pub fn find_duplicates(labels: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::with_capacity(labels.len());
    let mut reported = std::collections::HashSet::new();
    let mut dups = Vec::new();
    for label in labels {
        if !seen.insert(label.as_str()) && reported.insert(label.as_str()) {
            dups.push(label.clone());
        }
    }
    dups
}
