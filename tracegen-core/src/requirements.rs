//! Requirement scanning
//!
//! Picks identifier-prefixed requirement lines (e.g. `REQ-010: ...`) out of
//! extracted document text so the generation prompt can reference them.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::models::{Priority, Requirement};

/// Compliance regimes recognised in requirement text, as (needle, label)
const COMPLIANCE_MARKERS: &[(&str, &str)] = &[
    ("hipaa", "HIPAA"),
    ("gdpr", "GDPR"),
    ("part 11", "FDA 21 CFR Part 11"),
    ("part 820", "FDA 21 CFR Part 820"),
    ("62304", "IEC 62304"),
    ("13485", "ISO 13485"),
    ("27001", "ISO 27001"),
    ("section 508", "Section 508"),
    ("wcag", "WCAG 2.1"),
];

fn requirement_line() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^\s*(?:[-*•]\s*)?([A-Z][A-Z0-9]*-\d+)\s*[:.)\-]\s*(\S.*)$").ok()
        })
        .as_ref()
}

/// Scans text for requirement lines. Later duplicates of an identifier are
/// ignored.
pub fn scan_requirements(text: &str) -> Vec<Requirement> {
    let mut seen = BTreeSet::new();
    let mut requirements = Vec::new();
    let Some(pattern) = requirement_line() else {
        return requirements;
    };

    for line in text.lines() {
        let Some(caps) = pattern.captures(line) else {
            continue;
        };
        let requirement_id = caps[1].to_string();
        if !seen.insert(requirement_id.clone()) {
            continue;
        }
        let description = caps[2].trim().to_string();
        requirements.push(Requirement {
            requirement_id,
            priority: infer_priority(&description),
            compliance_references: detect_compliance(&description),
            description,
        });
    }

    requirements
}

/// Infers priority from modal wording
pub fn infer_priority(description: &str) -> Priority {
    let lower = description.to_lowercase();
    let has_word = |word: &str| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| w == word)
    };

    if has_word("critical") {
        Priority::Critical
    } else if has_word("must") || has_word("shall") {
        Priority::High
    } else if has_word("should") {
        Priority::Medium
    } else if has_word("may") || has_word("could") {
        Priority::Low
    } else {
        Priority::Medium
    }
}

/// Detects compliance regimes mentioned in the text
pub fn detect_compliance(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    COMPLIANCE_MARKERS
        .iter()
        .filter(|(needle, _)| lower.contains(needle))
        .map(|(_, label)| label.to_string())
        .collect()
}
