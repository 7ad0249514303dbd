//! AI Integration Module for tracegen
//!
//! Model client, prompt construction, response parsing, the fallback
//! catalog and the [`Generator`] that ties them together.

pub mod client;
pub mod fallback;
pub mod generator;
pub mod prompts;
pub mod responses;

pub use client::{AiClient, AiError, AiMode, ModelClient, OutputFormat};
pub use fallback::{fallback_test_cases, is_fallback, FALLBACK_PREFIX, FALLBACK_REQUIREMENT_ID};
pub use generator::{FallbackReason, Generation, GenerationSource, Generator};
pub use responses::{parse_test_cases, serialize_test_cases};
