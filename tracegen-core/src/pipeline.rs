//! Generation pipeline
//!
//! `Extracting → Generating → [Degraded] → Persisting → Aggregating → Done`.
//! Generation cannot fail, so the only way to reach `Failed` is a storage
//! error, which is returned to the caller.

use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::TraceabilityAggregator;
use crate::ai::{Generation, GenerationSource, Generator};
use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::db::{TestCaseStore, TraceabilityStore};
use crate::extract::{DocumentRef, DocumentStore, TextExtractor};
use crate::models::{TestCase, TestCaseStatus, TraceabilityDelta, TraceabilityEntry};
use crate::persist::{PersistenceError, Persister, RecordFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Extracting,
    Generating,
    /// Generation fell back to catalog or retained data
    Degraded,
    Persisting,
    Aggregating,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Extracting => "extracting",
            PipelineStage::Generating => "generating",
            PipelineStage::Degraded => "degraded",
            PipelineStage::Persisting => "persisting",
            PipelineStage::Aggregating => "aggregating",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Storage failures surfaced to the caller
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("traceability update failed for every requirement: {}", .failed.join(", "))]
    Aggregation { failed: Vec<String> },

    #[error("test case not found: {0}")]
    UnknownTestCase(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub struct GenerationReport {
    /// Every stage completed without a storage failure
    pub success: bool,
    /// Fallback or retained data was used instead of model output
    pub degraded: bool,
    /// Why generation degraded, when it did
    pub degraded_reason: Option<String>,
    /// The persisted test cases
    pub test_cases: Vec<TestCase>,
    pub generation_id: String,
    /// Requirements whose traceability merge failed
    pub failed_requirements: Vec<String>,
    /// Entries as they stand after this run
    pub traceability: Vec<TraceabilityEntry>,
    /// Stages visited, in order
    pub stages: Vec<PipelineStage>,
}

/// Coordinates extraction, generation, persistence and traceability
pub struct Pipeline<'a, S: TestCaseStore + TraceabilityStore + ?Sized> {
    documents: &'a dyn DocumentStore,
    generator: &'a Generator,
    store: &'a S,
    audit: &'a dyn AuditSink,
    user_id: Option<String>,
}

impl<'a, S: TestCaseStore + TraceabilityStore + ?Sized> Pipeline<'a, S> {
    pub fn new(
        documents: &'a dyn DocumentStore,
        generator: &'a Generator,
        store: &'a S,
        audit: &'a dyn AuditSink,
    ) -> Self {
        Self {
            documents,
            generator,
            store,
            audit,
            user_id: None,
        }
    }

    /// Attributes audit events to a user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn emit(&self, event: AuditEvent) {
        let event = event.with_user(self.user_id.clone());
        if let Err(e) = self.audit.record(&event) {
            warn!("Audit event {} not delivered: {:#}", event.event_type, e);
        }
    }

    /// Generates, persists and traces test cases for a stored document
    pub fn run_generation(
        &self,
        reference: &DocumentRef,
    ) -> Result<GenerationReport, PipelineError> {
        let generation_id = format!("gen-{}", Uuid::new_v4());
        let mut stages = vec![PipelineStage::Extracting];
        debug!("[{}] extracting {}", generation_id, reference);

        let extraction = TextExtractor::new(self.documents).extract(reference);
        self.emit(
            AuditEvent::new(
                AuditEventType::DocumentExtracted,
                &generation_id,
                reference.as_str(),
            )
            .with_count("characters", extraction.text().chars().count()),
        );

        stages.push(PipelineStage::Generating);
        debug!("[{}] generating", generation_id);
        let generation = self.generator.generate(extraction.text());
        self.emit(
            AuditEvent::new(
                AuditEventType::TestCaseGeneration,
                &generation_id,
                reference.as_str(),
            )
            .with_count("test_cases", generation.test_cases.len())
            .with_count("degraded", usize::from(generation.is_degraded())),
        );

        self.store_generation(generation_id, reference.as_str(), generation, stages)
    }

    /// Regenerates test cases with clarifications, then persists and traces
    /// them. Earlier associations are kept.
    pub fn run_regeneration(
        &self,
        existing: &[TestCase],
        clarifications: &str,
    ) -> Result<GenerationReport, PipelineError> {
        let generation_id = format!("gen-{}", Uuid::new_v4());
        let reference = existing
            .iter()
            .filter(|c| c.has_requirement())
            .map(|c| c.requirement_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
            .join(",");

        let stages = vec![PipelineStage::Generating];
        debug!("[{}] regenerating {} test cases", generation_id, existing.len());
        let generation = self.generator.regenerate(existing, clarifications);
        self.emit(
            AuditEvent::new(
                AuditEventType::TestCaseRegeneration,
                &generation_id,
                reference.as_str(),
            )
            .with_count("original", existing.len())
            .with_count("test_cases", generation.test_cases.len())
            .with_count("degraded", usize::from(generation.is_degraded())),
        );

        self.store_generation(generation_id, &reference, generation, stages)
    }

    /// Regenerates the stored test cases of one requirement
    pub fn regenerate_requirement(
        &self,
        requirement_id: &str,
        clarifications: &str,
    ) -> Result<GenerationReport, PipelineError> {
        let existing = self.store.list_test_cases_for(requirement_id)?;
        if existing.is_empty() {
            warn!("No stored test cases for {}", requirement_id);
        }
        self.run_regeneration(&existing, clarifications)
    }

    /// Persisting → Aggregating → Done, shared by both entry points
    fn store_generation(
        &self,
        generation_id: String,
        reference: &str,
        generation: Generation,
        mut stages: Vec<PipelineStage>,
    ) -> Result<GenerationReport, PipelineError> {
        let degraded = generation.is_degraded();
        let degraded_reason = match &generation.source {
            GenerationSource::Model => None,
            GenerationSource::Fallback(reason) | GenerationSource::Retained(reason) => {
                Some(reason.to_string())
            }
        };
        if degraded {
            stages.push(PipelineStage::Degraded);
        }

        stages.push(PipelineStage::Persisting);
        debug!("[{}] persisting {} test cases", generation_id, generation.test_cases.len());
        let persisted = Persister::new(self.store).upsert(&generation.test_cases);

        let (written, persist_error) = match persisted {
            Ok(report) => (report.written, None),
            Err(e) => (e.written.clone(), Some(e)),
        };
        self.emit(
            AuditEvent::new(AuditEventType::TestCasesPersisted, &generation_id, reference)
                .with_count("written", written.len())
                .with_count(
                    "failed",
                    persist_error.as_ref().map_or(0, |e| e.failures.len()),
                ),
        );

        // The written subset is traced even when the batch failed
        stages.push(PipelineStage::Aggregating);
        debug!("[{}] aggregating", generation_id);
        let merge = TraceabilityAggregator::new(self.store).merge(&written);
        self.emit(
            AuditEvent::new(AuditEventType::TraceabilityUpdated, &generation_id, reference)
                .with_count("requirements", merge.merged.len())
                .with_count("failed", merge.failed.len())
                .with_count("unlinked", merge.skipped),
        );

        if let Some(e) = persist_error {
            stages.push(PipelineStage::Failed);
            warn!("[{}] failed: {}", generation_id, e);
            self.emit(
                AuditEvent::new(AuditEventType::GenerationFailed, &generation_id, reference)
                    .with_count("failed", e.failures.len()),
            );
            return Err(PipelineError::Persistence(e));
        }

        if merge.merged.is_empty() && !merge.failed.is_empty() {
            stages.push(PipelineStage::Failed);
            let failed = merge.failed_requirements();
            warn!("[{}] traceability failed for {}", generation_id, failed.join(", "));
            self.emit(
                AuditEvent::new(AuditEventType::GenerationFailed, &generation_id, reference)
                    .with_count("failed", failed.len()),
            );
            return Err(PipelineError::Aggregation { failed });
        }

        stages.push(PipelineStage::Done);
        let report = GenerationReport {
            success: merge.is_complete(),
            degraded,
            degraded_reason,
            test_cases: written,
            generation_id,
            failed_requirements: merge.failed_requirements(),
            traceability: merge.merged,
            stages,
        };

        self.emit(
            AuditEvent::new(
                AuditEventType::GenerationCompleted,
                &report.generation_id,
                reference,
            )
            .with_count("test_cases", report.test_cases.len())
            .with_count("degraded", usize::from(report.degraded)),
        );
        info!(
            "[{}] {} test cases stored{}",
            report.generation_id,
            report.test_cases.len(),
            if report.degraded { " (degraded)" } else { "" }
        );
        Ok(report)
    }

    /// Records the execution result of a stored test case and recomputes
    /// its requirement's coverage
    pub fn record_status(
        &self,
        test_case_id: &str,
        status: TestCaseStatus,
    ) -> Result<Option<TraceabilityEntry>, PipelineError> {
        let mut case = self
            .store
            .get_test_case(test_case_id)?
            .ok_or_else(|| PipelineError::UnknownTestCase(test_case_id.to_string()))?;

        case.status = status;
        case.touch();
        self.store.upsert_test_case(&case).map_err(|e| {
            PipelineError::Persistence(PersistenceError {
                attempted: 1,
                written: Vec::new(),
                failures: vec![RecordFailure {
                    test_case_id: test_case_id.to_string(),
                    reason: format!("{:#}", e),
                }],
            })
        })?;

        self.emit(
            AuditEvent::new(AuditEventType::TestCaseStatusUpdated, "", test_case_id)
                .with_count("executed", usize::from(status.is_executed())),
        );

        if !case.has_requirement() {
            return Ok(None);
        }

        let mut delta = TraceabilityDelta::new(case.requirement_id.trim());
        delta.add(&case);
        let entry = self.store.atomic_merge(&delta).map_err(|e| {
            warn!("Traceability merge failed for {}: {:#}", delta.requirement_id, e);
            PipelineError::Aggregation {
                failed: vec![delta.requirement_id.clone()],
            }
        })?;

        info!(
            "{} marked {}; {} is {}",
            test_case_id, status, entry.requirement_id, entry.status
        );
        Ok(Some(entry))
    }
}
