#![allow(dead_code)]

use anyhow::Result;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use tracegen_core::{
    AiError, AuditEvent, AuditEventType, AuditSink, DocumentRef, DocumentStore, ModelClient,
    OutputFormat, SqliteBackend, TestCase, TestCaseStore, TraceabilityDelta, TraceabilityEntry,
    TraceabilityStore,
};

/// Documents held in memory
#[derive(Default)]
pub struct MemoryDocuments {
    docs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryDocuments {
    pub fn with(reference: &str, text: &str) -> Self {
        let docs = Self::default();
        docs.docs
            .lock()
            .unwrap()
            .insert(reference.to_string(), text.as_bytes().to_vec());
        docs
    }
}

impl DocumentStore for MemoryDocuments {
    fn read(&self, reference: &DocumentRef) -> Result<Vec<u8>> {
        self.docs
            .lock()
            .unwrap()
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such document: {}", reference))
    }

    fn write(&self, bytes: &[u8], path: &str) -> Result<DocumentRef> {
        self.docs
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(DocumentRef::new(path))
    }
}

/// Answers with queued replies, then fails
pub struct QueuedClient {
    replies: Mutex<VecDeque<String>>,
}

impl QueuedClient {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        }
    }
}

impl ModelClient for QueuedClient {
    fn is_available(&self) -> bool {
        true
    }

    fn invoke(&self, _prompt: &str, _format: OutputFormat) -> Result<String, AiError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AiError::RequestFailed("no more replies".to_string()))
    }
}

/// A model reply holding one test case
pub fn reply(test_case_id: &str, requirement_id: &str) -> String {
    serde_json::json!({
        "test_cases": [{
            "test_case_id": test_case_id,
            "title": format!("Verify {}", requirement_id),
            "requirement_id": requirement_id,
            "steps": ["prepare", "act", "verify"],
            "expected_result": "behaves as required",
            "priority": "High",
            "compliance_reference": ["HIPAA"]
        }]
    })
    .to_string()
}

/// Keeps every event it receives
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl RecordingSink {
    pub fn event_types(&self) -> Vec<AuditEventType> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect()
    }
}

impl AuditSink for RecordingSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Rejects every event
pub struct BrokenSink;

impl AuditSink for BrokenSink {
    fn record(&self, _event: &AuditEvent) -> Result<()> {
        anyhow::bail!("audit service unreachable")
    }
}

/// SQLite store that fails writes for chosen test cases and merges for
/// chosen requirements
pub struct FlakyStore {
    pub inner: SqliteBackend,
    pub rejected_cases: Vec<String>,
    pub broken_requirements: Vec<String>,
}

impl TestCaseStore for FlakyStore {
    fn upsert_test_case(&self, case: &TestCase) -> Result<()> {
        if self.rejected_cases.contains(&case.test_case_id) {
            anyhow::bail!("write timed out");
        }
        self.inner.upsert_test_case(case)
    }

    fn get_test_case(&self, test_case_id: &str) -> Result<Option<TestCase>> {
        self.inner.get_test_case(test_case_id)
    }

    fn list_test_cases(&self) -> Result<Vec<TestCase>> {
        self.inner.list_test_cases()
    }
}

impl TraceabilityStore for FlakyStore {
    fn get_entry(&self, requirement_id: &str) -> Result<Option<TraceabilityEntry>> {
        self.inner.get_entry(requirement_id)
    }

    fn list_entries(&self) -> Result<Vec<TraceabilityEntry>> {
        self.inner.list_entries()
    }

    fn atomic_merge(&self, delta: &TraceabilityDelta) -> Result<TraceabilityEntry> {
        if self.broken_requirements.contains(&delta.requirement_id) {
            anyhow::bail!("merge timed out");
        }
        self.inner.atomic_merge(delta)
    }
}
