//! Traceability aggregation
//!
//! Groups a batch of test cases by requirement and hands each group to the
//! store's atomic merge. One failing requirement does not stop the others.

use log::{debug, info, warn};
use std::collections::BTreeMap;

use crate::db::TraceabilityStore;
use crate::models::{TestCase, TraceabilityDelta, TraceabilityEntry};

/// Outcome of merging one batch
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Entries as they stand after a successful merge
    pub merged: Vec<TraceabilityEntry>,
    /// Requirement id to failure reason
    pub failed: BTreeMap<String, String>,
    /// Test cases without a requirement id
    pub skipped: usize,
}

impl MergeReport {
    /// True when every requirement merged
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_requirements(&self) -> Vec<String> {
        self.failed.keys().cloned().collect()
    }
}

/// Groups test cases into one delta per requirement, dropping those with no
/// requirement id. Returns the deltas and the number dropped.
pub fn group_by_requirement(test_cases: &[TestCase]) -> (BTreeMap<String, TraceabilityDelta>, usize) {
    let mut groups: BTreeMap<String, TraceabilityDelta> = BTreeMap::new();
    let mut skipped = 0;

    for case in test_cases {
        let requirement_id = case.requirement_id.trim();
        if requirement_id.is_empty() {
            skipped += 1;
            continue;
        }
        groups
            .entry(requirement_id.to_string())
            .or_insert_with(|| TraceabilityDelta::new(requirement_id))
            .add(case);
    }

    (groups, skipped)
}

/// Merges test cases into the traceability matrix
pub struct TraceabilityAggregator<'a, S: TraceabilityStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: TraceabilityStore + ?Sized> TraceabilityAggregator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Unions the batch into each affected requirement's entry
    pub fn merge(&self, test_cases: &[TestCase]) -> MergeReport {
        let (groups, skipped) = group_by_requirement(test_cases);
        if skipped > 0 {
            warn!("{} test cases have no requirement id and were not traced", skipped);
        }

        let mut report = MergeReport {
            skipped,
            ..Default::default()
        };

        for (requirement_id, delta) in groups {
            match self.store.atomic_merge(&delta) {
                Ok(entry) => {
                    debug!(
                        "Merged {} test cases into {} ({})",
                        delta.test_case_ids.len(),
                        requirement_id,
                        entry.status
                    );
                    report.merged.push(entry);
                }
                Err(e) => {
                    warn!("Traceability merge failed for {}: {:#}", requirement_id, e);
                    report.failed.insert(requirement_id, format!("{:#}", e));
                }
            }
        }

        info!(
            "Traceability updated for {} requirements ({} failed)",
            report.merged.len(),
            report.failed.len()
        );
        report
    }
}
