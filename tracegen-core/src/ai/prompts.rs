//! Prompt Templates for AI Operations
//!
//! Builds the generation and regeneration prompts, embedding the
//! requirements text and the test case schema the parser expects.

use crate::models::{Requirement, TestCase};

/// Upper bound on document text embedded in a prompt, in characters
pub const MAX_REQUIREMENTS_CHARS: usize = 60_000;

/// The JSON shape every prompt asks the model to answer with
const SCHEMA_DESCRIPTION: &str = r#"```json
{
  "test_cases": [
    {
      "test_case_id": "TC-001",
      "title": "<descriptive title>",
      "requirement_id": "<identifier of the requirement this case verifies>",
      "steps": ["<step 1>", "<step 2>", "<verification step>"],
      "expected_result": "<clear expected outcome>",
      "priority": "<Critical|High|Medium|Low>",
      "compliance_reference": ["<e.g. HIPAA>", "<e.g. FDA 21 CFR Part 11>"],
      "status": "Not Tested"
    }
  ]
}
```"#;

/// Truncates on a character boundary
fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Build the list of requirement identifiers found in the document
fn build_known_requirements(requirements: &[Requirement]) -> String {
    if requirements.is_empty() {
        return "(no requirement identifiers detected; invent stable ids such as REQ-001)"
            .to_string();
    }

    requirements
        .iter()
        .map(|r| {
            let compliance = if r.compliance_references.is_empty() {
                String::new()
            } else {
                format!(
                    " [{}]",
                    r.compliance_references
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            format!("- {} ({}): {}{}", r.requirement_id, r.priority, r.description, compliance)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build prompt for generating test cases from requirements text
pub fn build_generation_prompt(requirements_text: &str, requirements: &[Requirement]) -> String {
    let text = clip(requirements_text.trim(), MAX_REQUIREMENTS_CHARS);
    let known = build_known_requirements(requirements);

    format!(
        r#"You are a healthcare software testing expert with deep knowledge of medical device regulations, HIPAA compliance and FDA requirements.

## Requirements Document
{text}

## Known Requirement Identifiers
{known}

## Task
Generate comprehensive test cases for the requirements above:
1. Focus on healthcare compliance (HIPAA, FDA 21 CFR Part 11, FDA 21 CFR Part 820, IEC 62304)
2. Include security testing for patient data protection
3. Cover accessibility requirements (Section 508, WCAG 2.1)
4. Include performance testing for critical healthcare workflows
5. Test error handling, data integrity and audit trails
6. Include boundary testing for medical data inputs

Every test case must reference exactly one requirement identifier from the list above.
Test case identifiers must be unique within your answer.

## Response Format
Respond ONLY with valid JSON in this exact format:
{SCHEMA_DESCRIPTION}"#
    )
}

/// Build prompt for regenerating test cases with user clarifications
pub fn build_regeneration_prompt(existing: &[TestCase], clarifications: &str) -> String {
    let original = serde_json::to_string_pretty(existing).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"You are a healthcare software testing expert. Improve and regenerate the following test cases based on user feedback.

## Original Test Cases
{original}

## User Clarifications and Feedback
{clarifications}

## Task
1. Address all user feedback and clarifications
2. Improve test case clarity and completeness
3. Add missing test scenarios based on the feedback
4. Keep each case linked to its original requirement_id
5. Ensure healthcare compliance requirements are met

## Response Format
Respond ONLY with valid JSON in this exact format:
{SCHEMA_DESCRIPTION}"#,
        clarifications = clarifications.trim()
    )
}
