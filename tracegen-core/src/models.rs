use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Priority shared by requirements and test cases
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "Critical"),
            Priority::High => write!(f, "High"),
            Priority::Medium => write!(f, "Medium"),
            Priority::Low => write!(f, "Low"),
        }
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" | "p0" => Ok(Priority::Critical),
            "high" | "p1" => Ok(Priority::High),
            "medium" | "normal" | "p2" => Ok(Priority::Medium),
            "low" | "p3" => Ok(Priority::Low),
            other => anyhow::bail!("Unknown priority: {}", other),
        }
    }
}

/// Execution status of a single test case
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TestCaseStatus {
    #[default]
    #[serde(alias = "Not Tested")]
    NotTested,
    Passed,
    Failed,
    Blocked,
}

impl TestCaseStatus {
    /// Anything other than `NotTested` counts as executed for coverage
    pub fn is_executed(&self) -> bool {
        !matches!(self, TestCaseStatus::NotTested)
    }
}

impl fmt::Display for TestCaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestCaseStatus::NotTested => write!(f, "Not Tested"),
            TestCaseStatus::Passed => write!(f, "Passed"),
            TestCaseStatus::Failed => write!(f, "Failed"),
            TestCaseStatus::Blocked => write!(f, "Blocked"),
        }
    }
}

impl FromStr for TestCaseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "nottested" | "untested" | "pending" => Ok(TestCaseStatus::NotTested),
            "passed" | "pass" => Ok(TestCaseStatus::Passed),
            "failed" | "fail" => Ok(TestCaseStatus::Failed),
            "blocked" => Ok(TestCaseStatus::Blocked),
            _ => anyhow::bail!("Unknown test case status: {}", s),
        }
    }
}

/// Coverage of a requirement by its associated test cases
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum CoverageStatus {
    #[default]
    NotTested,
    PartiallyTested,
    FullyTested,
}

impl CoverageStatus {
    /// Derives coverage from the number of linked test cases and how many of
    /// them have been executed.
    pub fn from_counts(linked: usize, executed: usize) -> Self {
        if linked == 0 || executed == 0 {
            CoverageStatus::NotTested
        } else if executed >= linked {
            CoverageStatus::FullyTested
        } else {
            CoverageStatus::PartiallyTested
        }
    }

    /// Derives coverage from the statuses of every linked test case
    pub fn compute<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TestCaseStatus>,
    {
        let (linked, executed) = statuses
            .into_iter()
            .fold((0, 0), |(linked, executed), status| {
                (linked + 1, executed + usize::from(status.is_executed()))
            });
        Self::from_counts(linked, executed)
    }

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageStatus::NotTested => "NotTested",
            CoverageStatus::PartiallyTested => "PartiallyTested",
            CoverageStatus::FullyTested => "FullyTested",
        }
    }
}

impl fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageStatus::NotTested => write!(f, "Not Tested"),
            CoverageStatus::PartiallyTested => write!(f, "Partially Tested"),
            CoverageStatus::FullyTested => write!(f, "Fully Tested"),
        }
    }
}

/// A requirement found in a source document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    pub requirement_id: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub compliance_references: BTreeSet<String>,
}

/// A generated test case
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCase {
    pub test_case_id: String,
    pub title: String,
    /// May be empty when the model could not link the case to a requirement
    pub requirement_id: String,
    pub steps: Vec<String>,
    pub expected_result: String,
    pub priority: Priority,
    pub compliance_reference: BTreeSet<String>,
    pub status: TestCaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestCase {
    /// Creates a test case with empty content and `NotTested` status
    pub fn new(test_case_id: String, title: String, requirement_id: String) -> Self {
        let now = Utc::now();
        Self {
            test_case_id,
            title,
            requirement_id,
            steps: Vec::new(),
            expected_result: String::new(),
            priority: Priority::default(),
            compliance_reference: BTreeSet::new(),
            status: TestCaseStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the case is linked to a requirement
    pub fn has_requirement(&self) -> bool {
        !self.requirement_id.trim().is_empty()
    }

    /// Refreshes `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One row of the traceability matrix
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceabilityEntry {
    pub requirement_id: String,
    pub test_case_ids: BTreeSet<String>,
    pub compliance_references: BTreeSet<String>,
    pub status: CoverageStatus,
    pub last_updated: DateTime<Utc>,
}

impl TraceabilityEntry {
    /// Creates an empty entry for a requirement
    pub fn new(requirement_id: String) -> Self {
        Self {
            requirement_id,
            test_case_ids: BTreeSet::new(),
            compliance_references: BTreeSet::new(),
            status: CoverageStatus::NotTested,
            last_updated: Utc::now(),
        }
    }

    /// Unions a delta into this entry and recomputes coverage.
    ///
    /// `status_of` looks up the current status of a linked test case; ids it
    /// does not know about count as `NotTested`.
    pub fn absorb<F>(&mut self, delta: &TraceabilityDelta, status_of: F)
    where
        F: Fn(&str) -> Option<TestCaseStatus>,
    {
        self.test_case_ids
            .extend(delta.test_case_ids.iter().cloned());
        self.compliance_references
            .extend(delta.compliance_references.iter().cloned());
        self.status = CoverageStatus::compute(
            self.test_case_ids
                .iter()
                .map(|id| status_of(id).unwrap_or_default()),
        );
        self.last_updated = Utc::now();
    }
}

/// The per-requirement contribution of one batch of test cases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceabilityDelta {
    pub requirement_id: String,
    pub test_case_ids: BTreeSet<String>,
    pub compliance_references: BTreeSet<String>,
}

impl TraceabilityDelta {
    pub fn new(requirement_id: impl Into<String>) -> Self {
        Self {
            requirement_id: requirement_id.into(),
            ..Default::default()
        }
    }

    /// Adds one test case's id and compliance tags
    pub fn add(&mut self, case: &TestCase) {
        if !case.test_case_id.is_empty() {
            self.test_case_ids.insert(case.test_case_id.clone());
        }
        self.compliance_references
            .extend(case.compliance_reference.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case_with_status(id: &str, status: TestCaseStatus) -> TestCase {
        let mut case = TestCase::new(id.to_string(), format!("Case {}", id), "REQ-1".to_string());
        case.status = status;
        case
    }

    #[test]
    fn test_coverage_empty_is_not_tested() {
        assert_eq!(CoverageStatus::compute(Vec::new()), CoverageStatus::NotTested);
    }

    #[test]
    fn test_coverage_mixed_is_partial() {
        let status = CoverageStatus::compute(vec![TestCaseStatus::NotTested, TestCaseStatus::Passed]);
        assert_eq!(status, CoverageStatus::PartiallyTested);
    }

    #[test]
    fn test_coverage_failed_counts_as_tested() {
        let status = CoverageStatus::compute(vec![TestCaseStatus::Passed, TestCaseStatus::Failed]);
        assert_eq!(status, CoverageStatus::FullyTested);
    }

    #[test]
    fn test_coverage_nothing_executed() {
        let status = CoverageStatus::compute(vec![TestCaseStatus::NotTested]);
        assert_eq!(status, CoverageStatus::NotTested);
    }

    #[test]
    fn test_status_from_str_variants() {
        assert_eq!("Not Tested".parse::<TestCaseStatus>().unwrap(), TestCaseStatus::NotTested);
        assert_eq!("not_tested".parse::<TestCaseStatus>().unwrap(), TestCaseStatus::NotTested);
        assert_eq!("PASSED".parse::<TestCaseStatus>().unwrap(), TestCaseStatus::Passed);
        assert!("skipped".parse::<TestCaseStatus>().is_err());
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!(" High ".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_status_deserializes_legacy_spelling() {
        let status: TestCaseStatus = serde_json::from_str("\"Not Tested\"").unwrap();
        assert_eq!(status, TestCaseStatus::NotTested);
    }

    #[test]
    fn test_absorb_unions_and_never_shrinks() {
        let mut entry = TraceabilityEntry::new("REQ-5".to_string());

        let mut first = TraceabilityDelta::new("REQ-5");
        first.add(&case_with_status("TC-1", TestCaseStatus::Passed));
        entry.absorb(&first, |_| Some(TestCaseStatus::Passed));

        let mut second = TraceabilityDelta::new("REQ-5");
        second.add(&case_with_status("TC-2", TestCaseStatus::NotTested));
        entry.absorb(&second, |id| {
            if id == "TC-1" {
                Some(TestCaseStatus::Passed)
            } else {
                Some(TestCaseStatus::NotTested)
            }
        });

        let ids: Vec<&str> = entry.test_case_ids.iter().map(String::as_str).collect();
        assert_eq!(ids, vec!["TC-1", "TC-2"]);
        assert_eq!(entry.status, CoverageStatus::PartiallyTested);
    }

    #[test]
    fn test_absorb_unknown_cases_count_as_not_tested() {
        let mut entry = TraceabilityEntry::new("REQ-9".to_string());
        let mut delta = TraceabilityDelta::new("REQ-9");
        delta.test_case_ids.insert("TC-GONE".to_string());
        entry.absorb(&delta, |_| None);
        assert_eq!(entry.status, CoverageStatus::NotTested);
    }

    #[test]
    fn test_delta_collects_compliance_union() {
        let mut a = case_with_status("TC-1", TestCaseStatus::NotTested);
        a.compliance_reference.insert("HIPAA".to_string());
        let mut b = case_with_status("TC-2", TestCaseStatus::NotTested);
        b.compliance_reference.insert("HIPAA".to_string());
        b.compliance_reference.insert("GDPR".to_string());

        let mut delta = TraceabilityDelta::new("REQ-1");
        delta.add(&a);
        delta.add(&b);
        assert_eq!(delta.test_case_ids.len(), 2);
        assert_eq!(delta.compliance_references.len(), 2);
    }
}
