//! YAML file storage backend
//!
//! Stores test cases and the traceability matrix in one YAML document,
//! using [`Storage`] for locking. Every write is a locked
//! reload-apply-save cycle.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{TestCase, TraceabilityDelta, TraceabilityEntry};
use crate::storage::{Storage, TraceStore};

use super::traits::{BackendType, DatabaseBackend, TestCaseStore, TraceabilityStore};

/// YAML file backend implementation
pub struct YamlBackend {
    storage: Storage,
    path: PathBuf,
}

impl YamlBackend {
    /// Creates a new YAML backend with the default 5 second lock timeout
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_timeout(path, Duration::from_secs(5))
    }

    /// Creates a new YAML backend; writers wait up to `lock_timeout` for
    /// the file lock
    pub fn with_timeout<P: AsRef<Path>>(path: P, lock_timeout: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            storage: Storage::new(&path, lock_timeout),
            path,
        }
    }

    /// Gets a reference to the underlying Storage
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn load(&self) -> Result<TraceStore> {
        self.storage.load()
    }
}

impl TestCaseStore for YamlBackend {
    fn upsert_test_case(&self, case: &TestCase) -> Result<()> {
        self.storage.update_atomically(|store| {
            store
                .test_cases
                .insert(case.test_case_id.clone(), case.clone());
            Ok(())
        })
    }

    fn get_test_case(&self, test_case_id: &str) -> Result<Option<TestCase>> {
        Ok(self.load()?.test_cases.remove(test_case_id))
    }

    fn list_test_cases(&self) -> Result<Vec<TestCase>> {
        Ok(self.load()?.test_cases.into_values().collect())
    }
}

impl TraceabilityStore for YamlBackend {
    fn get_entry(&self, requirement_id: &str) -> Result<Option<TraceabilityEntry>> {
        Ok(self.load()?.traceability.remove(requirement_id))
    }

    fn list_entries(&self) -> Result<Vec<TraceabilityEntry>> {
        Ok(self.load()?.traceability.into_values().collect())
    }

    fn atomic_merge(&self, delta: &TraceabilityDelta) -> Result<TraceabilityEntry> {
        if delta.requirement_id.trim().is_empty() {
            anyhow::bail!("Cannot merge traceability for an empty requirement id");
        }

        self.storage.update_atomically(|store| {
            let TraceStore {
                test_cases,
                traceability,
                ..
            } = store;

            let entry = traceability
                .entry(delta.requirement_id.clone())
                .or_insert_with(|| TraceabilityEntry::new(delta.requirement_id.clone()));
            entry.absorb(delta, |id| test_cases.get(id).map(|c| c.status));
            Ok(entry.clone())
        })
    }
}

impl DatabaseBackend for YamlBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Yaml
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
