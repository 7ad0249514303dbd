mod common;

use std::collections::BTreeSet;
use tempfile::{NamedTempFile, TempDir};

use common::{reply, BrokenSink, FlakyStore, MemoryDocuments, QueuedClient, RecordingSink};
use tracegen_core::{
    AiClient, AuditEventType, CoverageStatus, DocumentRef, Generator, Pipeline, PipelineError,
    PipelineStage, SqliteBackend, TestCaseStatus, TestCaseStore, TraceabilityStore, YamlBackend,
};

const REQUIREMENTS: &str = "REQ-010: system must lock account after 5 failed logins";

fn offline_generator() -> Generator {
    Generator::new(Box::new(AiClient::default()))
}

fn ids(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[test]
fn fallback_generation_is_traced_under_fallback_requirement() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = SqliteBackend::new(temp_file.path()).unwrap();
    let docs = MemoryDocuments::with("reqs.txt", REQUIREMENTS);
    let generator = offline_generator();
    let sink = RecordingSink::default();

    let report = Pipeline::new(&docs, &generator, &store, &sink)
        .run_generation(&DocumentRef::new("reqs.txt"))
        .unwrap();

    assert!(report.success);
    assert!(report.degraded);
    assert!(report.generation_id.starts_with("gen-"));
    assert_eq!(report.test_cases.len(), 1);
    assert_eq!(report.test_cases[0].test_case_id, "TC-FALLBACK-01");
    assert_eq!(report.test_cases[0].requirement_id, "REQ-001");
    assert_eq!(
        report.stages,
        vec![
            PipelineStage::Extracting,
            PipelineStage::Generating,
            PipelineStage::Degraded,
            PipelineStage::Persisting,
            PipelineStage::Aggregating,
            PipelineStage::Done,
        ]
    );

    assert_eq!(store.list_test_cases().unwrap().len(), 1);
    let entry = store.get_entry("REQ-001").unwrap().unwrap();
    assert_eq!(entry.test_case_ids, ids(&["TC-FALLBACK-01"]));
    assert_eq!(entry.status, CoverageStatus::NotTested);
}

#[test]
fn fallback_generation_on_yaml_backend() {
    let temp_dir = TempDir::new().unwrap();
    let store = YamlBackend::new(temp_dir.path().join("trace.yaml"));
    let docs = MemoryDocuments::with("reqs.txt", REQUIREMENTS);
    let generator = offline_generator();
    let sink = RecordingSink::default();

    let report = Pipeline::new(&docs, &generator, &store, &sink)
        .run_generation(&DocumentRef::new("reqs.txt"))
        .unwrap();

    assert!(report.degraded);
    let entry = store.get_entry("REQ-001").unwrap().unwrap();
    assert_eq!(entry.test_case_ids, ids(&["TC-FALLBACK-01"]));
    assert_eq!(entry.status, CoverageStatus::NotTested);
}

#[test]
fn missing_document_still_produces_result() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = SqliteBackend::new(temp_file.path()).unwrap();
    let docs = MemoryDocuments::default();
    let generator = Generator::new(Box::new(QueuedClient::new(&[&reply("TC-1", "REQ-1")])));
    let sink = RecordingSink::default();

    let report = Pipeline::new(&docs, &generator, &store, &sink)
        .run_generation(&DocumentRef::new("missing.pdf"))
        .unwrap();

    // Empty extraction goes straight to the catalog without calling the model
    assert!(report.success);
    assert!(report.degraded);
    assert_eq!(report.test_cases[0].test_case_id, "TC-FALLBACK-01");
}

#[test]
fn sequential_generations_union_test_cases() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = SqliteBackend::new(temp_file.path()).unwrap();
    let docs = MemoryDocuments::with("reqs.txt", "REQ-5: the system shall encrypt records");
    let first = reply("TC-1", "REQ-5");
    let second = reply("TC-2", "REQ-5");
    let generator = Generator::new(Box::new(QueuedClient::new(&[&first, &second])));
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(&docs, &generator, &store, &sink);

    let report = pipeline.run_generation(&DocumentRef::new("reqs.txt")).unwrap();
    assert!(!report.degraded);
    pipeline.run_generation(&DocumentRef::new("reqs.txt")).unwrap();

    let entry = store.get_entry("REQ-5").unwrap().unwrap();
    assert_eq!(entry.test_case_ids, ids(&["TC-1", "TC-2"]));
    assert_eq!(entry.compliance_references, ids(&["HIPAA"]));
}

#[test]
fn audit_events_follow_stages() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = SqliteBackend::new(temp_file.path()).unwrap();
    let docs = MemoryDocuments::with("reqs.txt", REQUIREMENTS);
    let generator = offline_generator();
    let sink = RecordingSink::default();

    let report = Pipeline::new(&docs, &generator, &store, &sink)
        .with_user("qa-lead")
        .run_generation(&DocumentRef::new("reqs.txt"))
        .unwrap();

    assert_eq!(
        sink.event_types(),
        vec![
            AuditEventType::DocumentExtracted,
            AuditEventType::TestCaseGeneration,
            AuditEventType::TestCasesPersisted,
            AuditEventType::TraceabilityUpdated,
            AuditEventType::GenerationCompleted,
        ]
    );
    let events = sink.events.lock().unwrap();
    assert!(events
        .iter()
        .all(|e| e.generation_id == report.generation_id && e.reference == "reqs.txt"));
    assert_eq!(events[1].counts["degraded"], 1);
    assert_eq!(events[0].user_id.as_deref(), Some("qa-lead"));
}

#[test]
fn broken_audit_sink_does_not_change_outcome() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = SqliteBackend::new(temp_file.path()).unwrap();
    let docs = MemoryDocuments::with("reqs.txt", REQUIREMENTS);
    let generator = offline_generator();

    let report = Pipeline::new(&docs, &generator, &store, &BrokenSink)
        .run_generation(&DocumentRef::new("reqs.txt"))
        .unwrap();

    assert!(report.success);
    assert!(store.get_entry("REQ-001").unwrap().is_some());
}

#[test]
fn persistence_failure_is_surfaced_and_written_subset_traced() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = FlakyStore {
        inner: SqliteBackend::new(temp_file.path()).unwrap(),
        rejected_cases: vec!["TC-2".to_string()],
        broken_requirements: Vec::new(),
    };
    let docs = MemoryDocuments::with("reqs.txt", "REQ-7: audit trail");
    let answer = serde_json::json!([
        {"test_case_id": "TC-1", "title": "a", "requirement_id": "REQ-7", "steps": ["x"], "expected_result": "y"},
        {"test_case_id": "TC-2", "title": "b", "requirement_id": "REQ-7", "steps": ["x"], "expected_result": "y"}
    ])
    .to_string();
    let generator = Generator::new(Box::new(QueuedClient::new(&[&answer])));
    let sink = RecordingSink::default();

    let err = Pipeline::new(&docs, &generator, &store, &sink)
        .run_generation(&DocumentRef::new("reqs.txt"))
        .unwrap_err();

    match err {
        PipelineError::Persistence(e) => {
            assert_eq!(e.attempted, 2);
            assert_eq!(e.failures.len(), 1);
            assert_eq!(e.failures[0].test_case_id, "TC-2");
        }
        other => panic!("unexpected error: {}", other),
    }

    let entry = store.get_entry("REQ-7").unwrap().unwrap();
    assert_eq!(entry.test_case_ids, ids(&["TC-1"]));
    assert_eq!(sink.event_types().last(), Some(&AuditEventType::GenerationFailed));
}

#[test]
fn partial_aggregation_failure_is_reported() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = FlakyStore {
        inner: SqliteBackend::new(temp_file.path()).unwrap(),
        rejected_cases: Vec::new(),
        broken_requirements: vec!["REQ-B".to_string()],
    };
    let docs = MemoryDocuments::with("reqs.txt", "REQ-A: one\nREQ-B: two");
    let answer = serde_json::json!([
        {"test_case_id": "TC-A", "title": "a", "requirement_id": "REQ-A", "steps": ["x"], "expected_result": "y"},
        {"test_case_id": "TC-B", "title": "b", "requirement_id": "REQ-B", "steps": ["x"], "expected_result": "y"}
    ])
    .to_string();
    let generator = Generator::new(Box::new(QueuedClient::new(&[&answer])));
    let sink = RecordingSink::default();

    let report = Pipeline::new(&docs, &generator, &store, &sink)
        .run_generation(&DocumentRef::new("reqs.txt"))
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.failed_requirements, vec!["REQ-B"]);
    assert_eq!(report.test_cases.len(), 2);
    assert!(store.get_entry("REQ-A").unwrap().is_some());
    assert!(store.get_entry("REQ-B").unwrap().is_none());
}

#[test]
fn total_aggregation_failure_is_an_error() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = FlakyStore {
        inner: SqliteBackend::new(temp_file.path()).unwrap(),
        rejected_cases: Vec::new(),
        broken_requirements: vec!["REQ-001".to_string()],
    };
    let docs = MemoryDocuments::default();
    let generator = offline_generator();
    let sink = RecordingSink::default();

    let err = Pipeline::new(&docs, &generator, &store, &sink)
        .run_generation(&DocumentRef::new("none.pdf"))
        .unwrap_err();

    assert!(matches!(err, PipelineError::Aggregation { ref failed } if failed == &["REQ-001"]));
}

#[test]
fn recorded_status_drives_coverage() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = SqliteBackend::new(temp_file.path()).unwrap();
    let docs = MemoryDocuments::with("reqs.txt", "REQ-5: encrypt");
    let answer = serde_json::json!([
        {"test_case_id": "TC-1", "title": "a", "requirement_id": "REQ-5", "steps": ["x"], "expected_result": "y"},
        {"test_case_id": "TC-2", "title": "b", "requirement_id": "REQ-5", "steps": ["x"], "expected_result": "y"}
    ])
    .to_string();
    let generator = Generator::new(Box::new(QueuedClient::new(&[&answer])));
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(&docs, &generator, &store, &sink);

    pipeline.run_generation(&DocumentRef::new("reqs.txt")).unwrap();
    assert_eq!(
        store.get_entry("REQ-5").unwrap().unwrap().status,
        CoverageStatus::NotTested
    );

    let entry = pipeline
        .record_status("TC-1", TestCaseStatus::Passed)
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, CoverageStatus::PartiallyTested);

    let entry = pipeline
        .record_status("TC-2", TestCaseStatus::Failed)
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, CoverageStatus::FullyTested);
    assert_eq!(
        store.get_test_case("TC-2").unwrap().unwrap().status,
        TestCaseStatus::Failed
    );

    assert!(matches!(
        pipeline.record_status("TC-404", TestCaseStatus::Passed),
        Err(PipelineError::UnknownTestCase(_))
    ));
}

#[test]
fn failed_regeneration_keeps_prior_associations() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = SqliteBackend::new(temp_file.path()).unwrap();
    let docs = MemoryDocuments::with("reqs.txt", "REQ-5: encrypt");
    // One good reply for the first generation; the regeneration call fails
    let first = reply("TC-1", "REQ-5");
    let generator = Generator::new(Box::new(QueuedClient::new(&[&first])));
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(&docs, &generator, &store, &sink);

    pipeline.run_generation(&DocumentRef::new("reqs.txt")).unwrap();
    let report = pipeline
        .regenerate_requirement("REQ-5", "cover expired certificates")
        .unwrap();

    assert!(report.degraded);
    assert_eq!(report.test_cases.len(), 1);
    assert_eq!(report.test_cases[0].test_case_id, "TC-1");
    assert_eq!(
        store.get_entry("REQ-5").unwrap().unwrap().test_case_ids,
        ids(&["TC-1"])
    );
    assert_eq!(
        sink.event_types()
            .iter()
            .filter(|t| **t == AuditEventType::TestCaseRegeneration)
            .count(),
        1
    );
}

#[test]
fn regeneration_adds_to_existing_entry() {
    let temp_file = NamedTempFile::with_suffix(".db").unwrap();
    let store = SqliteBackend::new(temp_file.path()).unwrap();
    let docs = MemoryDocuments::with("reqs.txt", "REQ-5: encrypt");
    let first = reply("TC-1", "REQ-5");
    let regenerated = reply("TC-9", "REQ-5");
    let generator = Generator::new(Box::new(QueuedClient::new(&[&first, &regenerated])));
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(&docs, &generator, &store, &sink);

    pipeline.run_generation(&DocumentRef::new("reqs.txt")).unwrap();
    let report = pipeline.regenerate_requirement("REQ-5", "add more").unwrap();

    assert!(!report.degraded);
    assert_eq!(
        report.stages.first(),
        Some(&PipelineStage::Generating)
    );
    assert_eq!(
        store.get_entry("REQ-5").unwrap().unwrap().test_case_ids,
        ids(&["TC-1", "TC-9"])
    );
}
