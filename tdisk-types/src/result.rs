//! Uniform result reporting for backend operations
//!
//! Every externally visible operation returns a [`BackendResult`] so that
//! partial success (e.g. three of four candidate combinations scored, one
//! skipped because of an offline member) is representable and reported
//! rather than silently dropped. The result channel only accumulates and
//! classifies; rendering to text or key/value form is the job of an
//! external collaborator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The component a result entry is meant for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResultCategory {
    /// Not specific to any component
    General,

    /// Meant for the external block driver
    Driver,

    /// Meant for the configuration file
    ConfigFile,

    /// Composite-disk creation
    Create,

    /// New-combination advice
    Advice,

    /// Rebalancing recommendations
    Rebalance,
}

/// Severity classification of one result entry, ordered by priority
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Success,
    Offline,
    Warning,
    Error,
}

/// One individual result entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualResult {
    pub kind: ResultKind,
    pub message: String,

    /// Optional typed payload (already JSON-encoded for the result sink)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Accumulated outcome of one backend operation.
///
/// Owned by the caller, consumed once, then discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendResult {
    entries: BTreeMap<ResultCategory, Vec<IndividualResult>>,
}

impl BackendResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a plain success message for the given category
    pub fn message(&mut self, category: ResultCategory, message: impl Into<String>) {
        self.push(category, ResultKind::Success, message, None);
    }

    /// Records a warning for the given category
    pub fn warning(&mut self, category: ResultCategory, message: impl Into<String>) {
        self.push(category, ResultKind::Warning, message, None);
    }

    /// Records an offline condition for the given category
    pub fn offline(&mut self, category: ResultCategory, message: impl Into<String>) {
        self.push(category, ResultKind::Offline, message, None);
    }

    /// Records an error for the given category
    pub fn error(&mut self, category: ResultCategory, message: impl Into<String>) {
        self.push(category, ResultKind::Error, message, None);
    }

    /// Records a successful entry carrying a typed value.
    ///
    /// Serialization failures are reported as an error entry in the same
    /// category instead of panicking inside the result channel.
    pub fn value<T: Serialize>(
        &mut self,
        category: ResultCategory,
        message: impl Into<String>,
        value: &T,
    ) {
        match serde_json::to_value(value) {
            Ok(value) => self.push(category, ResultKind::Success, message, Some(value)),
            Err(error) => self.push(
                category,
                ResultKind::Error,
                format!("failed to encode result value: {error}"),
                None,
            ),
        }
    }

    fn push(
        &mut self,
        category: ResultCategory,
        kind: ResultKind,
        message: impl Into<String>,
        value: Option<serde_json::Value>,
    ) {
        self.entries
            .entry(category)
            .or_default()
            .push(IndividualResult {
                kind,
                message: message.into(),
                value,
            });
    }

    /// The overall call succeeded iff no entry at or above error severity
    /// exists
    pub fn succeeded(&self) -> bool {
        self.highest_severity() < ResultKind::Error
    }

    /// The most severe kind recorded so far
    pub fn highest_severity(&self) -> ResultKind {
        self.entries
            .values()
            .flatten()
            .map(|entry| entry.kind)
            .max()
            .unwrap_or(ResultKind::Success)
    }

    /// Entries recorded under one category, in insertion order
    pub fn entries(&self, category: ResultCategory) -> &[IndividualResult] {
        self.entries
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All recorded entries with their categories
    pub fn iter(&self) -> impl Iterator<Item = (ResultCategory, &IndividualResult)> {
        self.entries
            .iter()
            .flat_map(|(category, entries)| entries.iter().map(|entry| (*category, entry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_succeeds() {
        let result = BackendResult::new();
        assert!(result.succeeded());
        assert_eq!(result.highest_severity(), ResultKind::Success);
    }

    #[test]
    fn test_warning_does_not_fail() {
        let mut result = BackendResult::new();
        result.message(ResultCategory::General, "listed 2 disks");
        result.warning(ResultCategory::Driver, "one member is slow");

        assert!(result.succeeded());
        assert_eq!(result.highest_severity(), ResultKind::Warning);
    }

    #[test]
    fn test_error_fails() {
        let mut result = BackendResult::new();
        result.message(ResultCategory::General, "partial advice");
        result.error(ResultCategory::Advice, "driver unreachable");

        assert!(!result.succeeded());
        assert_eq!(result.entries(ResultCategory::Advice).len(), 1);
    }

    #[test]
    fn test_entries_keep_insertion_order() {
        let mut result = BackendResult::new();
        result.message(ResultCategory::Advice, "first");
        result.warning(ResultCategory::Advice, "second");

        let entries = result.entries(ResultCategory::Advice);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
    }

    #[test]
    fn test_typed_value_roundtrip() {
        let mut result = BackendResult::new();
        result.value(ResultCategory::General, "disk count", &2u32);

        let json = serde_json::to_string(&result).unwrap();
        let parsed: BackendResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);

        let entry = &parsed.entries(ResultCategory::General)[0];
        assert_eq!(entry.value, Some(serde_json::json!(2)));
    }
}
