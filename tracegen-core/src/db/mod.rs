//! Database abstraction layer for tracegen
//!
//! This module provides a trait-based abstraction for storage backends,
//! so the pipeline can persist to a YAML file or a SQLite database through
//! the same interface.

mod sqlite_backend;
mod traits;
mod yaml_backend;

pub use sqlite_backend::SqliteBackend;
pub use traits::{
    BackendType, DatabaseBackend, DatabaseConfig, DatabaseStats, TestCaseStore, TraceabilityStore,
};
pub use yaml_backend::YamlBackend;

use anyhow::Result;

/// Creates a database backend for the configured path and type
pub fn create_backend(config: &DatabaseConfig) -> Result<Box<dyn DatabaseBackend>> {
    match config.backend_type {
        BackendType::Yaml => Ok(Box::new(YamlBackend::with_timeout(
            &config.path,
            config.busy_timeout,
        ))),
        BackendType::Sqlite => Ok(Box::new(SqliteBackend::with_timeout(
            &config.path,
            config.busy_timeout,
        )?)),
    }
}
