//! Test case persistence
//!
//! Upserts a batch record by record. Partial success is allowed but never
//! silent: every record that could not be written is named in the
//! [`PersistenceError`].

use log::{debug, info, warn};
use thiserror::Error;

use crate::db::TestCaseStore;
use crate::models::TestCase;

/// One record that could not be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub test_case_id: String,
    pub reason: String,
}

/// Some or all records of a batch could not be written
#[derive(Debug, Clone, Error)]
#[error(
    "failed to persist {} of {} test cases ({})",
    .failures.len(),
    .attempted,
    failed_ids(.failures)
)]
pub struct PersistenceError {
    pub attempted: usize,
    /// Records that were written before or after the failures
    pub written: Vec<TestCase>,
    pub failures: Vec<RecordFailure>,
}

fn failed_ids(failures: &[RecordFailure]) -> String {
    failures
        .iter()
        .map(|f| f.test_case_id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Records written by a fully successful batch
#[derive(Debug, Clone, Default)]
pub struct PersistReport {
    pub written: Vec<TestCase>,
}

/// Writes test cases to a [`TestCaseStore`]
pub struct Persister<'a, S: TestCaseStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: TestCaseStore + ?Sized> Persister<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Upserts every record by `test_case_id` (last write wins), refreshing
    /// `updated_at`. Continues past failures and reports them together.
    pub fn upsert(&self, test_cases: &[TestCase]) -> Result<PersistReport, PersistenceError> {
        let mut written = Vec::with_capacity(test_cases.len());
        let mut failures = Vec::new();

        for case in test_cases {
            let mut record = case.clone();
            record.touch();

            match self.store.upsert_test_case(&record) {
                Ok(()) => {
                    debug!("Persisted test case {}", record.test_case_id);
                    written.push(record);
                }
                Err(e) => {
                    warn!("Failed to persist test case {}: {:#}", record.test_case_id, e);
                    failures.push(RecordFailure {
                        test_case_id: record.test_case_id,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        if failures.is_empty() {
            info!("Persisted {} test cases", written.len());
            Ok(PersistReport { written })
        } else {
            Err(PersistenceError {
                attempted: test_cases.len(),
                written,
                failures,
            })
        }
    }
}
