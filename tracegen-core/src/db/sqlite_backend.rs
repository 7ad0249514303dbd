//! SQLite database storage backend
//!
//! Test cases live in one table; the traceability matrix is an entry row
//! plus two append-only link tables, so a merge is a set union expressed as
//! `INSERT OR IGNORE` inside a single immediate transaction.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::models::{CoverageStatus, TestCase, TestCaseStatus, TraceabilityDelta, TraceabilityEntry};

use super::traits::{BackendType, DatabaseBackend, TestCaseStore, TraceabilityStore};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// Raw `test_cases` row, converted outside the rusqlite row closure
struct TestCaseRow {
    test_case_id: String,
    title: String,
    requirement_id: String,
    steps: String,
    expected_result: String,
    priority: String,
    compliance_reference: String,
    status: String,
    created_at: String,
    updated_at: String,
}

/// SQLite backend implementation
pub struct SqliteBackend {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (or creates) a database with the default 5 second busy timeout
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_timeout(path, Duration::from_secs(5))
    }

    /// Opens (or creates) a database; writers wait up to `busy_timeout` for
    /// locks held by other connections
    pub fn with_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;

        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let backend = Self {
            path,
            conn: Mutex::new(conn),
        };

        backend.init_schema()?;
        Ok(backend)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned: {:?}", self.path))
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        let current_version: i32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);

        if current_version == 0 {
            conn.execute_batch(include_str!("schema.sql"))
                .context("Failed to create database schema")?;
        } else if current_version < SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema version {} is outdated, expected {}",
                current_version,
                SCHEMA_VERSION
            );
        }

        Ok(())
    }

    /// Converts a TestCaseStatus to a string for storage
    fn status_to_str(status: &TestCaseStatus) -> &'static str {
        match status {
            TestCaseStatus::NotTested => "NotTested",
            TestCaseStatus::Passed => "Passed",
            TestCaseStatus::Failed => "Failed",
            TestCaseStatus::Blocked => "Blocked",
        }
    }

    /// Parses a CoverageStatus from a string
    fn str_to_coverage(s: &str) -> CoverageStatus {
        match s {
            "PartiallyTested" => CoverageStatus::PartiallyTested,
            "FullyTested" => CoverageStatus::FullyTested,
            _ => CoverageStatus::NotTested,
        }
    }

    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
        Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("Invalid timestamp in database: {}", s))?
            .with_timezone(&Utc))
    }

    fn row_to_test_case(row: TestCaseRow) -> Result<TestCase> {
        Ok(TestCase {
            steps: serde_json::from_str(&row.steps)
                .with_context(|| format!("Invalid steps for test case {}", row.test_case_id))?,
            compliance_reference: serde_json::from_str(&row.compliance_reference).with_context(
                || format!("Invalid compliance references for test case {}", row.test_case_id),
            )?,
            priority: row.priority.parse().unwrap_or_default(),
            status: row.status.parse().unwrap_or_default(),
            created_at: Self::parse_timestamp(&row.created_at)?,
            updated_at: Self::parse_timestamp(&row.updated_at)?,
            test_case_id: row.test_case_id,
            title: row.title,
            requirement_id: row.requirement_id,
            expected_result: row.expected_result,
        })
    }

    fn query_test_cases(
        conn: &Connection,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<TestCase>> {
        let sql = format!(
            "SELECT test_case_id, title, requirement_id, steps, expected_result, priority,
                    compliance_reference, status, created_at, updated_at
             FROM test_cases {} ORDER BY test_case_id",
            filter
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt.query_map(args, |row| {
            Ok(TestCaseRow {
                test_case_id: row.get(0)?,
                title: row.get(1)?,
                requirement_id: row.get(2)?,
                steps: row.get(3)?,
                expected_result: row.get(4)?,
                priority: row.get(5)?,
                compliance_reference: row.get(6)?,
                status: row.get(7)?,
                created_at: row.get(8)?,
                updated_at: row.get(9)?,
            })
        })?;

        let mut cases = Vec::new();
        for row in rows {
            cases.push(Self::row_to_test_case(row?)?);
        }
        Ok(cases)
    }

    /// Reads one traceability entry with its link sets
    fn read_entry(conn: &Connection, requirement_id: &str) -> Result<Option<TraceabilityEntry>> {
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT status, last_updated FROM traceability WHERE requirement_id = ?1",
                params![requirement_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((status, last_updated)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare_cached(
            "SELECT test_case_id FROM traceability_test_cases WHERE requirement_id = ?1",
        )?;
        let test_case_ids: BTreeSet<String> = stmt
            .query_map(params![requirement_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = conn.prepare_cached(
            "SELECT reference FROM traceability_compliance WHERE requirement_id = ?1",
        )?;
        let compliance_references: BTreeSet<String> = stmt
            .query_map(params![requirement_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;

        Ok(Some(TraceabilityEntry {
            requirement_id: requirement_id.to_string(),
            test_case_ids,
            compliance_references,
            status: Self::str_to_coverage(&status),
            last_updated: Self::parse_timestamp(&last_updated)?,
        }))
    }
}

impl TestCaseStore for SqliteBackend {
    fn upsert_test_case(&self, case: &TestCase) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO test_cases
                (test_case_id, title, requirement_id, steps, expected_result, priority,
                 compliance_reference, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                case.test_case_id,
                case.title,
                case.requirement_id,
                serde_json::to_string(&case.steps)?,
                case.expected_result,
                case.priority.to_string(),
                serde_json::to_string(&case.compliance_reference)?,
                Self::status_to_str(&case.status),
                case.created_at.to_rfc3339(),
                case.updated_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to write test case {}", case.test_case_id))?;
        Ok(())
    }

    fn get_test_case(&self, test_case_id: &str) -> Result<Option<TestCase>> {
        let conn = self.conn()?;
        let mut cases =
            Self::query_test_cases(&conn, "WHERE test_case_id = ?1", &[&test_case_id])?;
        Ok(cases.pop())
    }

    fn list_test_cases(&self) -> Result<Vec<TestCase>> {
        let conn = self.conn()?;
        Self::query_test_cases(&conn, "", &[])
    }

    fn list_test_cases_for(&self, requirement_id: &str) -> Result<Vec<TestCase>> {
        let conn = self.conn()?;
        Self::query_test_cases(&conn, "WHERE requirement_id = ?1", &[&requirement_id])
    }
}

impl TraceabilityStore for SqliteBackend {
    fn get_entry(&self, requirement_id: &str) -> Result<Option<TraceabilityEntry>> {
        let conn = self.conn()?;
        Self::read_entry(&conn, requirement_id)
    }

    fn list_entries(&self) -> Result<Vec<TraceabilityEntry>> {
        let conn = self.conn()?;
        let ids: Vec<String> = {
            let mut stmt =
                conn.prepare("SELECT requirement_id FROM traceability ORDER BY requirement_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = Self::read_entry(&conn, &id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn atomic_merge(&self, delta: &TraceabilityDelta) -> Result<TraceabilityEntry> {
        let requirement_id = delta.requirement_id.as_str();
        if requirement_id.trim().is_empty() {
            anyhow::bail!("Cannot merge traceability for an empty requirement id");
        }

        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front so the link inserts and the
        // coverage count see the same snapshot
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .with_context(|| format!("Failed to begin merge for {}", requirement_id))?;

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO traceability (requirement_id, status, last_updated)
             VALUES (?1, 'NotTested', ?2)
             ON CONFLICT(requirement_id) DO UPDATE SET last_updated = excluded.last_updated",
            params![requirement_id, now],
        )?;

        {
            let mut link = tx.prepare_cached(
                "INSERT OR IGNORE INTO traceability_test_cases (requirement_id, test_case_id)
                 VALUES (?1, ?2)",
            )?;
            for test_case_id in &delta.test_case_ids {
                link.execute(params![requirement_id, test_case_id])?;
            }

            let mut tag = tx.prepare_cached(
                "INSERT OR IGNORE INTO traceability_compliance (requirement_id, reference)
                 VALUES (?1, ?2)",
            )?;
            for reference in &delta.compliance_references {
                tag.execute(params![requirement_id, reference])?;
            }
        }

        let (linked, executed): (i64, i64) = tx.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN tc.status IS NOT NULL AND tc.status != 'NotTested'
                                      THEN 1 ELSE 0 END), 0)
             FROM traceability_test_cases l
             LEFT JOIN test_cases tc ON tc.test_case_id = l.test_case_id
             WHERE l.requirement_id = ?1",
            params![requirement_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let status = CoverageStatus::from_counts(linked as usize, executed as usize);
        tx.execute(
            "UPDATE traceability SET status = ?2 WHERE requirement_id = ?1",
            params![requirement_id, status.as_str()],
        )?;

        let entry = Self::read_entry(&tx, requirement_id)?
            .with_context(|| format!("Traceability entry vanished: {}", requirement_id))?;

        tx.commit()
            .with_context(|| format!("Failed to commit merge for {}", requirement_id))?;
        Ok(entry)
    }
}

impl DatabaseBackend for SqliteBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
