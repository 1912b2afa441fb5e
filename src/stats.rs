use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Accumulated counters for one fixing run.
///
/// Created once per run and threaded through every worker step as an explicit
/// `&mut` accumulator; serialized into the run report at the end, never
/// persisted incrementally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixCounts {
    pub successful_refs: u64,
    pub failed_refs: u64,
    pub successful_docs: u64,
    pub unchanged_docs: u64,
    pub failed_docs: u64,
    /// Failed raw reference text → occurrence count, for operator triage.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failed_references: BTreeMap<String, u64>,
}

impl FixCounts {
    pub fn record_resolved_ref(&mut self) {
        self.successful_refs += 1;
    }

    pub fn record_failed_ref(&mut self, raw: &str) {
        self.failed_refs += 1;
        *self.failed_references.entry(raw.to_string()).or_insert(0) += 1;
    }

    pub fn record_updated_doc(&mut self) {
        self.successful_docs += 1;
    }

    pub fn record_unchanged_doc(&mut self) {
        self.unchanged_docs += 1;
    }

    pub fn record_failed_doc(&mut self) {
        self.failed_docs += 1;
    }

    pub fn documents_seen(&self) -> u64 {
        self.successful_docs + self.unchanged_docs + self.failed_docs
    }
}
