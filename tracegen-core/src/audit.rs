//! Audit events
//!
//! The pipeline emits one [`AuditEvent`] per stage transition. Delivery is
//! fire-and-forget; a failing sink never changes a pipeline outcome.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Target used by [`LogAuditSink`]
pub const AUDIT_LOG_TARGET: &str = "tracegen::audit";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    DocumentExtracted,
    TestCaseGeneration,
    TestCaseRegeneration,
    TestCasesPersisted,
    TraceabilityUpdated,
    TestCaseStatusUpdated,
    GenerationCompleted,
    GenerationFailed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::DocumentExtracted => "document_extracted",
            AuditEventType::TestCaseGeneration => "test_case_generation",
            AuditEventType::TestCaseRegeneration => "test_case_regeneration",
            AuditEventType::TestCasesPersisted => "test_cases_persisted",
            AuditEventType::TraceabilityUpdated => "traceability_updated",
            AuditEventType::TestCaseStatusUpdated => "test_case_status_updated",
            AuditEventType::GenerationCompleted => "generation_completed",
            AuditEventType::GenerationFailed => "generation_failed",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    /// Correlates all events of one pipeline run
    pub generation_id: String,
    /// Document reference or requirement/test case id the event concerns
    pub reference: String,
    pub counts: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        generation_id: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            generation_id: generation_id.into(),
            reference: reference.into(),
            counts: BTreeMap::new(),
            user_id: None,
        }
    }

    pub fn with_count(mut self, key: &str, count: usize) -> Self {
        self.counts.insert(key.to_string(), count);
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Receives audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Writes events as JSON lines through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        info!(target: AUDIT_LOG_TARGET, "{}", line);
        Ok(())
    }
}
