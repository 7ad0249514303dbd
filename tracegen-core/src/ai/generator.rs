//! Test case generation
//!
//! [`Generator`] is total: every call ends in a usable sequence of test
//! cases, either parsed from the model or substituted from the fallback
//! catalog (or, for regeneration, the caller's originals). How the result
//! was obtained is reported alongside it in [`GenerationSource`].

use log::{info, warn};
use std::collections::BTreeSet;
use std::fmt;

use crate::ai::client::{ModelClient, OutputFormat};
use crate::ai::fallback::fallback_test_cases;
use crate::ai::prompts;
use crate::ai::responses::parse_test_cases;
use crate::models::TestCase;
use crate::requirements::scan_requirements;

/// Why the model output was not used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// No requirements text to generate from
    EmptyInput,
    /// The model client was never initialised
    ModelUnavailable,
    /// The model call failed or timed out
    ModelFailed(String),
    /// The model answered but nothing could be parsed
    Unparseable(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::EmptyInput => write!(f, "no requirements text"),
            FallbackReason::ModelUnavailable => write!(f, "model unavailable"),
            FallbackReason::ModelFailed(e) => write!(f, "model call failed: {}", e),
            FallbackReason::Unparseable(e) => write!(f, "model output unparseable: {}", e),
        }
    }
}

/// Where the test cases of a [`Generation`] came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationSource {
    /// Parsed from the model's answer
    Model,
    /// Substituted from the fallback catalog
    Fallback(FallbackReason),
    /// Regeneration failed; the original cases were kept
    Retained(FallbackReason),
}

/// Result of one generator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub test_cases: Vec<TestCase>,
    pub source: GenerationSource,
}

impl Generation {
    /// True when the cases did not come from the model
    pub fn is_degraded(&self) -> bool {
        !matches!(self.source, GenerationSource::Model)
    }

    fn fallback(reason: FallbackReason) -> Self {
        warn!("Using fallback test cases: {}", reason);
        Self {
            test_cases: fallback_test_cases(),
            source: GenerationSource::Fallback(reason),
        }
    }

    fn retained(existing: &[TestCase], reason: FallbackReason) -> Self {
        warn!("Keeping original test cases: {}", reason);
        Self {
            test_cases: existing.to_vec(),
            source: GenerationSource::Retained(reason),
        }
    }
}

/// Generates test cases through a model client
pub struct Generator {
    client: Box<dyn ModelClient>,
}

impl Generator {
    pub fn new(client: Box<dyn ModelClient>) -> Self {
        Self { client }
    }

    /// Description of the model in use
    pub fn model_description(&self) -> String {
        if self.client.is_available() {
            self.client.describe()
        } else {
            "unavailable".to_string()
        }
    }

    /// Generate test cases for a requirements document.
    ///
    /// Calls the model at most once; never fails and never returns an empty
    /// sequence.
    pub fn generate(&self, requirements_text: &str) -> Generation {
        if requirements_text.trim().is_empty() {
            return Generation::fallback(FallbackReason::EmptyInput);
        }
        if !self.client.is_available() {
            return Generation::fallback(FallbackReason::ModelUnavailable);
        }

        let requirements = scan_requirements(requirements_text);
        let prompt = prompts::build_generation_prompt(requirements_text, &requirements);

        let response = match self.client.invoke(&prompt, OutputFormat::Json) {
            Ok(response) => response,
            Err(e) => return Generation::fallback(FallbackReason::ModelFailed(e.to_string())),
        };

        match parse_test_cases(&response) {
            Ok(test_cases) => {
                info!(
                    "Generated {} test cases for {} detected requirements",
                    test_cases.len(),
                    requirements.len()
                );
                Generation {
                    test_cases,
                    source: GenerationSource::Model,
                }
            }
            Err(e) => Generation::fallback(FallbackReason::Unparseable(e.to_string())),
        }
    }

    /// Regenerate test cases with user clarifications.
    ///
    /// On any failure the `existing` cases are returned unchanged.
    pub fn regenerate(&self, existing: &[TestCase], clarifications: &str) -> Generation {
        if !self.client.is_available() {
            return Generation::retained(existing, FallbackReason::ModelUnavailable);
        }

        let prompt = prompts::build_regeneration_prompt(existing, clarifications);
        let response = match self.client.invoke(&prompt, OutputFormat::Json) {
            Ok(response) => response,
            Err(e) => {
                return Generation::retained(existing, FallbackReason::ModelFailed(e.to_string()))
            }
        };

        match parse_test_cases(&response) {
            Ok(mut test_cases) => {
                inherit_requirement(existing, &mut test_cases);
                info!(
                    "Regenerated {} test cases from {} originals",
                    test_cases.len(),
                    existing.len()
                );
                Generation {
                    test_cases,
                    source: GenerationSource::Model,
                }
            }
            Err(e) => Generation::retained(existing, FallbackReason::Unparseable(e.to_string())),
        }
    }
}

/// Links unlinked regenerated cases to the originals' requirement when the
/// originals all share one
fn inherit_requirement(existing: &[TestCase], regenerated: &mut [TestCase]) {
    let requirement_ids: BTreeSet<&str> = existing
        .iter()
        .filter(|c| c.has_requirement())
        .map(|c| c.requirement_id.as_str())
        .collect();

    if let [only] = requirement_ids.into_iter().collect::<Vec<_>>().as_slice() {
        for case in regenerated.iter_mut().filter(|c| !c.has_requirement()) {
            case.requirement_id = only.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::AiError;
    use crate::ai::fallback::FALLBACK_PREFIX;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replays a fixed answer (or a failure) and counts calls
    struct ScriptedClient {
        available: bool,
        reply: Option<String>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedClient {
        fn boxed(available: bool, reply: Option<&str>) -> (Box<dyn ModelClient>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let client = ScriptedClient {
                available,
                reply: reply.map(str::to_string),
                calls: Arc::clone(&calls),
            };
            (Box::new(client), calls)
        }
    }

    impl ModelClient for ScriptedClient {
        fn is_available(&self) -> bool {
            self.available
        }

        fn invoke(&self, _prompt: &str, _format: OutputFormat) -> Result<String, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .ok_or_else(|| AiError::RequestFailed("connection reset".to_string()))
        }
    }

    const GOOD_REPLY: &str = r#"{"test_cases": [
        {"test_case_id": "TC-1", "title": "Lockout", "requirement_id": "REQ-010",
         "steps": ["fail 5 logins"], "expected_result": "locked"}
    ]}"#;

    #[test]
    fn test_empty_input_returns_catalog() {
        let (client, calls) = ScriptedClient::boxed(true, Some(GOOD_REPLY));
        let generation = Generator::new(client).generate("   ");
        assert_eq!(generation.test_cases, fallback_test_cases());
        assert_eq!(generation.source, GenerationSource::Fallback(FallbackReason::EmptyInput));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unavailable_model_returns_catalog() {
        let (client, calls) = ScriptedClient::boxed(false, Some(GOOD_REPLY));
        let generation = Generator::new(client).generate("REQ-010: lock accounts");
        assert!(generation.is_degraded());
        assert!(generation.test_cases[0].test_case_id.starts_with(FALLBACK_PREFIX));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_model_failure_returns_catalog_after_one_call() {
        let (client, calls) = ScriptedClient::boxed(true, None);
        let generation = Generator::new(client).generate("REQ-010: lock accounts");
        assert!(matches!(
            generation.source,
            GenerationSource::Fallback(FallbackReason::ModelFailed(_))
        ));
        assert_eq!(generation.test_cases, fallback_test_cases());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unparseable_reply_returns_catalog() {
        let (client, _) = ScriptedClient::boxed(true, Some("I am unable to comply."));
        let generation = Generator::new(client).generate("REQ-010: lock accounts");
        assert!(matches!(
            generation.source,
            GenerationSource::Fallback(FallbackReason::Unparseable(_))
        ));
        assert!(!generation.test_cases.is_empty());
    }

    #[test]
    fn test_good_reply_is_used() {
        let (client, calls) = ScriptedClient::boxed(true, Some(GOOD_REPLY));
        let generation = Generator::new(client).generate("REQ-010: lock accounts");
        assert!(!generation.is_degraded());
        assert_eq!(generation.test_cases.len(), 1);
        assert_eq!(generation.test_cases[0].requirement_id, "REQ-010");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_generate_never_empty() {
        let inputs = ["", " ", "REQ-1: x", "\u{0}", "Test Case"];
        let replies = [None, Some(""), Some("[]"), Some("{}"), Some(GOOD_REPLY)];
        for input in inputs {
            for reply in replies {
                for available in [true, false] {
                    let (client, _) = ScriptedClient::boxed(available, reply);
                    let generation = Generator::new(client).generate(input);
                    assert!(!generation.test_cases.is_empty(), "{:?} / {:?}", input, reply);
                }
            }
        }
    }

    #[test]
    fn test_regenerate_failure_keeps_originals() {
        let original = vec![TestCase::new(
            "TC-7".to_string(),
            "Original".to_string(),
            "REQ-5".to_string(),
        )];

        let (client, _) = ScriptedClient::boxed(true, None);
        let generation = Generator::new(client).regenerate(&original, "add negative cases");
        assert_eq!(generation.test_cases, original);
        assert!(matches!(generation.source, GenerationSource::Retained(_)));

        let (client, _) = ScriptedClient::boxed(false, Some(GOOD_REPLY));
        let generation = Generator::new(client).regenerate(&original, "add negative cases");
        assert_eq!(generation.test_cases, original);
    }

    #[test]
    fn test_regenerate_inherits_requirement() {
        let original = vec![TestCase::new(
            "TC-7".to_string(),
            "Original".to_string(),
            "REQ-5".to_string(),
        )];
        let reply = r#"[{"test_case_id": "TC-8", "title": "Improved", "steps": ["a"]}]"#;
        let (client, _) = ScriptedClient::boxed(true, Some(reply));
        let generation = Generator::new(client).regenerate(&original, "be thorough");
        assert_eq!(generation.source, GenerationSource::Model);
        assert_eq!(generation.test_cases[0].requirement_id, "REQ-5");
    }
}
