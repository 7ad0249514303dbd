pub mod aggregate;
pub mod ai;
pub mod audit;
pub mod config;
pub mod db;
pub mod extract;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod requirements;
pub mod storage;

// Re-export commonly used types
pub use aggregate::{group_by_requirement, MergeReport, TraceabilityAggregator};
pub use ai::{
    AiClient, AiError, AiMode, FallbackReason, Generation, GenerationSource, Generator,
    ModelClient, OutputFormat,
};
pub use audit::{AuditEvent, AuditEventType, AuditSink, LogAuditSink};
pub use config::{get_config_path, AiConfig, AiProvider, Config};
pub use db::{
    create_backend, BackendType, DatabaseBackend, DatabaseConfig, DatabaseStats, SqliteBackend,
    TestCaseStore, TraceabilityStore, YamlBackend,
};
pub use extract::{DocumentRef, DocumentStore, EmptyReason, Extraction, FsDocumentStore, TextExtractor};
pub use models::{
    CoverageStatus, Priority, Requirement, TestCase, TestCaseStatus, TraceabilityDelta,
    TraceabilityEntry,
};
pub use persist::{PersistReport, PersistenceError, Persister, RecordFailure};
pub use pipeline::{GenerationReport, Pipeline, PipelineError, PipelineStage};
pub use requirements::scan_requirements;
