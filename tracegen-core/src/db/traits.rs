//! Database abstraction traits
//!
//! Every storage backend implements [`TestCaseStore`] and
//! [`TraceabilityStore`]; [`DatabaseBackend`] adds backend metadata.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::models::{CoverageStatus, TestCase, TraceabilityDelta, TraceabilityEntry};

/// Types of database backends available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// YAML file storage (single file)
    Yaml,
    /// SQLite database storage
    Sqlite,
}

impl BackendType {
    /// Infers the backend from a file extension, defaulting to SQLite
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => BackendType::Yaml,
            _ => BackendType::Sqlite,
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Yaml => write!(f, "YAML"),
            BackendType::Sqlite => write!(f, "SQLite"),
        }
    }
}

impl FromStr for BackendType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yaml" | "yml" => Ok(BackendType::Yaml),
            "sqlite" | "sqlite3" | "db" => Ok(BackendType::Sqlite),
            other => anyhow::bail!("Unknown backend type: {}", other),
        }
    }
}

/// Configuration for database backends
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub path: PathBuf,
    /// Backend type
    pub backend_type: BackendType,
    /// Bounded wait for locks held by other connections or processes
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    /// Config for a path, inferring the backend unless one is given
    pub fn for_path(path: &Path, backend_type: Option<BackendType>, busy_timeout: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            backend_type: backend_type.unwrap_or_else(|| BackendType::from_path(path)),
            busy_timeout,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tracegen.db"),
            backend_type: BackendType::Sqlite,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Durable storage of test cases, keyed by `test_case_id`
pub trait TestCaseStore: Send + Sync {
    /// Inserts a new test case or fully overwrites the stored one
    fn upsert_test_case(&self, case: &TestCase) -> Result<()>;

    /// Gets a test case by id
    fn get_test_case(&self, test_case_id: &str) -> Result<Option<TestCase>>;

    /// Lists all test cases ordered by id
    fn list_test_cases(&self) -> Result<Vec<TestCase>>;

    /// Lists the test cases linked to one requirement
    fn list_test_cases_for(&self, requirement_id: &str) -> Result<Vec<TestCase>> {
        Ok(self
            .list_test_cases()?
            .into_iter()
            .filter(|c| c.requirement_id == requirement_id)
            .collect())
    }
}

/// Storage of the requirement-keyed traceability matrix
pub trait TraceabilityStore: Send + Sync {
    /// Gets the entry for a requirement
    fn get_entry(&self, requirement_id: &str) -> Result<Option<TraceabilityEntry>>;

    /// Lists all entries ordered by requirement id
    fn list_entries(&self) -> Result<Vec<TraceabilityEntry>>;

    /// Unions `delta` into the requirement's entry, creating it if absent,
    /// and recomputes its coverage status.
    ///
    /// Implementations perform this as one atomic operation at the storage
    /// layer, so concurrent merges for the same requirement never lose
    /// associations.
    fn atomic_merge(&self, delta: &TraceabilityDelta) -> Result<TraceabilityEntry>;
}

/// Core trait for database backends
pub trait DatabaseBackend: TestCaseStore + TraceabilityStore {
    /// Returns the backend type
    fn backend_type(&self) -> BackendType;

    /// Returns the path to the database file
    fn path(&self) -> &Path;

    /// Returns true if the database file exists
    fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Returns statistics about the database
    fn stats(&self) -> Result<DatabaseStats> {
        let entries = self.list_entries()?;
        let count = |status: CoverageStatus| entries.iter().filter(|e| e.status == status).count();

        Ok(DatabaseStats {
            test_case_count: self.list_test_cases()?.len(),
            requirement_count: entries.len(),
            fully_tested: count(CoverageStatus::FullyTested),
            partially_tested: count(CoverageStatus::PartiallyTested),
            not_tested: count(CoverageStatus::NotTested),
            backend_type: self.backend_type(),
        })
    }
}

/// Statistics about a database
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub test_case_count: usize,
    pub requirement_count: usize,
    pub fully_tested: usize,
    pub partially_tested: usize,
    pub not_tested: usize,
    pub backend_type: BackendType,
}
