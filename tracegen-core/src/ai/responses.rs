//! Response Parsing Module
//!
//! Turns raw model output into validated test cases. JSON answers are
//! decoded structurally, record by record; answers that are not JSON go
//! through a line-oriented parser keyed on field prefixes such as `Title:`.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

use crate::ai::client::AiError;
use crate::models::{Priority, TestCase, TestCaseStatus};

/// Strip markdown code fences and surrounding chatter, returning the JSON
/// candidate
fn extract_json(response: &str) -> &str {
    // Look for JSON in markdown code block
    if let Some(start) = response.find("```json") {
        let json_start = start + 7; // Skip "```json"
        if let Some(end) = response[json_start..].find("```") {
            return response[json_start..json_start + end].trim();
        }
    }

    // Look for generic code block
    if let Some(start) = response.find("```") {
        let code_start = start + 3;
        // Skip language identifier if present
        let json_start = if let Some(newline) = response[code_start..].find('\n') {
            code_start + newline + 1
        } else {
            code_start
        };
        if let Some(end) = response[json_start..].find("```") {
            return response[json_start..json_start + end].trim();
        }
    }

    // Try to find a JSON object or array directly
    let object = response.find('{').zip(response.rfind('}'));
    let array = response.find('[').zip(response.rfind(']'));
    let span = match (object, array) {
        (Some(o), Some(a)) => Some(if a.0 < o.0 { a } else { o }),
        (o, a) => o.or(a),
    };
    if let Some((start, end)) = span {
        if end > start {
            return &response[start..=end];
        }
    }

    response.trim()
}

/// Locate the list of candidate records in a decoded JSON answer
fn candidate_records(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut obj) => {
            for key in ["test_cases", "testCases", "tests"] {
                if let Some(Value::Array(items)) = obj.remove(key) {
                    return Some(items);
                }
            }
            // A bare single record
            if obj.contains_key("title") || obj.contains_key("steps") {
                return Some(vec![Value::Object(obj)]);
            }
            None
        }
        _ => None,
    }
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn as_text(value: Option<&Value>, name: &str) -> Result<String, String> {
    match value {
        None => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(format!("{} has unexpected type: {}", name, other)),
    }
}

fn as_steps(value: Option<&Value>) -> Result<Vec<String>, String> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s
            .lines()
            .map(|l| strip_list_marker(l.trim()).to_string())
            .filter(|l| !l.is_empty())
            .collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Object(step) => field(step, &["action", "step", "description"])
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| format!("step has no text: {}", item)),
                other => Err(format!("step has unexpected type: {}", other)),
            })
            .collect(),
        Some(other) => Err(format!("steps has unexpected type: {}", other)),
    }
}

fn as_tags(value: Option<&Value>) -> Result<BTreeSet<String>, String> {
    match value {
        None => Ok(BTreeSet::new()),
        Some(Value::String(s)) => Ok(split_tags(s)),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("compliance reference has unexpected type: {}", item))
            })
            .filter(|r| !matches!(r, Ok(s) if s.trim().is_empty()))
            .collect(),
        Some(other) => Err(format!("compliance_reference has unexpected type: {}", other)),
    }
}

fn as_timestamp(value: Option<&Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

fn split_tags(s: &str) -> BTreeSet<String> {
    s.split([',', ';'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_priority(s: &str) -> Priority {
    s.parse().unwrap_or_default()
}

fn parse_status(s: &str) -> TestCaseStatus {
    s.parse().unwrap_or_default()
}

/// Id for a record the model left unnamed. `batch` is unique per parse so
/// unnamed records from different answers never share an id.
fn fallback_id(batch: &str, index: usize) -> String {
    format!("TC-{}-{:03}", batch, index + 1)
}

fn new_batch_token() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

/// A record with no title, steps or expected result carries nothing worth
/// keeping
fn has_content(case: &TestCase) -> bool {
    !case.title.trim().is_empty()
        || !case.steps.is_empty()
        || !case.expected_result.trim().is_empty()
}

/// Decode one JSON record into a test case
fn record_from_value(
    value: &Value,
    batch: &str,
    index: usize,
    now: DateTime<Utc>,
) -> Result<TestCase, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("record is not an object: {}", value))?;

    let mut test_case_id = as_text(field(obj, &["test_case_id", "testCaseId", "id"]), "test_case_id")?;
    if test_case_id.trim().is_empty() {
        test_case_id = fallback_id(batch, index);
    }

    let case = TestCase {
        test_case_id,
        title: as_text(field(obj, &["title", "name"]), "title")?,
        requirement_id: as_text(
            field(obj, &["requirement_id", "requirementId", "requirement"]),
            "requirement_id",
        )?,
        steps: as_steps(field(obj, &["steps"]))?,
        expected_result: as_text(
            field(obj, &["expected_result", "expectedResult", "expected"]),
            "expected_result",
        )?,
        priority: parse_priority(&as_text(field(obj, &["priority"]), "priority")?),
        compliance_reference: as_tags(field(
            obj,
            &["compliance_reference", "compliance_references", "compliance"],
        ))?,
        status: parse_status(&as_text(field(obj, &["status"]), "status")?),
        created_at: as_timestamp(field(obj, &["created_at"]), now),
        updated_at: as_timestamp(field(obj, &["updated_at"]), now),
    };

    if !has_content(&case) {
        return Err(format!("record {} has no content", case.test_case_id));
    }
    Ok(case)
}

/// Structural decode. `None` means the text was not decodable JSON in a
/// recognised shape; `Some` carries the surviving records.
fn parse_structured(response: &str, batch: &str, now: DateTime<Utc>) -> Option<Vec<TestCase>> {
    let json_str = extract_json(response);
    let value: Value = match serde_json::from_str(json_str) {
        Ok(value) => value,
        Err(e) => {
            debug!("Structural decode failed: {}", e);
            return None;
        }
    };

    let records = candidate_records(value)?;
    let total = records.len();
    let cases: Vec<TestCase> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| match record_from_value(record, batch, index, now) {
            Ok(case) => Some(case),
            Err(reason) => {
                warn!("Dropping malformed test case record: {}", reason);
                None
            }
        })
        .collect();

    debug!("Structural decode kept {} of {} records", cases.len(), total);
    Some(cases)
}

/// Case-insensitive prefix strip
fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        line.get(prefix.len()..).map(str::trim)
    } else {
        None
    }
}

/// Strips a leading bullet or `1.` / `1)` ordinal
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim_start();
        }
    }
    line
}

fn is_list_item(line: &str) -> bool {
    strip_list_marker(line).len() != line.len()
}

/// Finds a `TC-...` style identifier inside a header line
fn header_id(header: &str) -> Option<String> {
    header
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .find(|token| match (token.get(..3), token.get(3..)) {
            (Some(head), Some(tail)) => {
                head.eq_ignore_ascii_case("tc-") && tail.chars().any(|c| c.is_ascii_alphanumeric())
            }
            _ => false,
        })
        .map(|token| token.trim_end_matches(['.', ')']).to_string())
}

/// Line-oriented fallback parser for answers that are not JSON
fn parse_lenient(response: &str, batch: &str, now: DateTime<Utc>) -> Vec<TestCase> {
    let mut records: Vec<TestCase> = Vec::new();
    let mut current: Option<TestCase> = None;
    let mut in_steps = false;
    // Set on the line after a `Test Case ...` header, where an id line
    // names that record instead of opening a new one
    let mut awaiting_id = false;

    let new_record = |count: usize| {
        let mut case = TestCase::new(fallback_id(batch, count), String::new(), String::new());
        case.created_at = now;
        case.updated_at = now;
        case
    };

    for raw_line in response.lines() {
        let cleaned = raw_line.trim().trim_start_matches('#').replace("**", "");
        let line = cleaned.trim();
        if line.is_empty() {
            continue;
        }
        let id_names_header = std::mem::take(&mut awaiting_id);

        if let Some(rest) = strip_prefix_ci(line, "Test Case ID:") {
            if !id_names_header {
                if let Some(done) = current.take() {
                    records.push(done);
                }
            }
            let case = current.get_or_insert_with(|| new_record(records.len()));
            if !rest.is_empty() {
                case.test_case_id = rest.to_string();
            }
            in_steps = false;
            continue;
        }

        if strip_prefix_ci(line, "Test Case").is_some() {
            if let Some(done) = current.take() {
                records.push(done);
            }
            let mut case = new_record(records.len());
            if let Some(id) = header_id(line) {
                case.test_case_id = id;
            }
            case.title = match line.split_once(':') {
                Some((_, rest)) if !rest.trim().is_empty() => rest.trim().to_string(),
                _ => line.to_string(),
            };
            current = Some(case);
            in_steps = false;
            awaiting_id = true;
            continue;
        }

        if let Some(rest) = strip_prefix_ci(line, "Title:") {
            let case = current.get_or_insert_with(|| new_record(records.len()));
            case.title = rest.to_string();
            in_steps = false;
            continue;
        }

        // Remaining field markers only apply inside a record
        let Some(case) = current.as_mut() else {
            continue;
        };

        if let Some(rest) = strip_prefix_ci(line, "Steps:") {
            if !rest.is_empty() {
                case.steps.push(rest.to_string());
            }
            in_steps = true;
        } else if let Some(rest) = strip_prefix_ci(line, "Expected Result:")
            .or_else(|| strip_prefix_ci(line, "Expected:"))
        {
            case.expected_result = rest.to_string();
            in_steps = false;
        } else if let Some(rest) = strip_prefix_ci(line, "Requirement ID:")
            .or_else(|| strip_prefix_ci(line, "Requirement:"))
        {
            case.requirement_id = rest.to_string();
            in_steps = false;
        } else if let Some(rest) = strip_prefix_ci(line, "Priority:") {
            case.priority = parse_priority(rest);
            in_steps = false;
        } else if let Some(rest) = strip_prefix_ci(line, "Compliance:") {
            case.compliance_reference = split_tags(rest);
            in_steps = false;
        } else if let Some(rest) = strip_prefix_ci(line, "Status:") {
            case.status = parse_status(rest);
            in_steps = false;
        } else if in_steps && is_list_item(line) {
            let step = strip_list_marker(line);
            if !step.is_empty() {
                case.steps.push(step.to_string());
            }
        } else {
            // Description, preconditions and prose end a steps block
            in_steps = false;
        }
    }

    if let Some(done) = current.take() {
        records.push(done);
    }

    records.into_iter().filter(has_content).collect()
}

/// Keeps the first record for each identifier
fn dedupe_ids(cases: Vec<TestCase>) -> Vec<TestCase> {
    let mut seen = HashSet::new();
    cases
        .into_iter()
        .filter(|case| {
            let fresh = seen.insert(case.test_case_id.clone());
            if !fresh {
                warn!("Dropping test case with duplicate id {}", case.test_case_id);
            }
            fresh
        })
        .collect()
}

/// Parse test cases from a model response.
///
/// Returns `InvalidResponse` when neither the structural nor the lenient
/// parse yields at least one record.
pub fn parse_test_cases(response: &str) -> Result<Vec<TestCase>, AiError> {
    let now = Utc::now();

    let batch = new_batch_token();

    if let Some(cases) = parse_structured(response, &batch, now) {
        let cases = dedupe_ids(cases);
        if !cases.is_empty() {
            return Ok(cases);
        }
    }

    let cases = dedupe_ids(parse_lenient(response, &batch, now));
    if !cases.is_empty() {
        debug!("Lenient parse recovered {} test cases", cases.len());
        return Ok(cases);
    }

    let preview: String = response.trim().chars().take(200).collect();
    Err(AiError::InvalidResponse(format!(
        "No test cases found in response: {}",
        preview
    )))
}

/// Serialize test cases in the same shape the prompts ask the model for
pub fn serialize_test_cases(cases: &[TestCase]) -> String {
    serde_json::to_string_pretty(&json!({ "test_cases": cases }))
        .unwrap_or_else(|_| r#"{"test_cases": []}"#.to_string())
}
