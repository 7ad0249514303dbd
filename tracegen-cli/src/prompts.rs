use anyhow::Result;
use inquire::{Confirm, Editor};

use tracegen_core::TestCase;

/// Prompts for regeneration clarifications, showing the current test cases
pub fn prompt_clarifications(existing: &[TestCase]) -> Result<Option<String>> {
    for case in existing {
        println!("  {} {}", case.test_case_id, case.title);
    }

    let clarifications = Editor::new("Clarifications for the model:")
        .with_help_message("Describe missing scenarios or corrections")
        .prompt()?;

    if clarifications.trim().is_empty() {
        return Ok(None);
    }

    let proceed = Confirm::new("Regenerate with these clarifications?")
        .with_default(true)
        .prompt()?;

    Ok(proceed.then_some(clarifications))
}
