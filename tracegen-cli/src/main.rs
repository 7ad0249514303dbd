mod cli;
mod prompts;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::fs;
use std::path::Path;

use tracegen_core::{
    create_backend, get_config_path, AiClient, Config, CoverageStatus, DatabaseBackend,
    DocumentRef, DocumentStore, FsDocumentStore, GenerationReport, Generator, LogAuditSink,
    Pipeline, Priority, TestCaseStatus, TestCaseStore, TraceabilityStore,
};

use crate::cli::{Cli, Command, ConfigCommand};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => get_config_path()?,
    };
    log::debug!("Using config {}", config_path.display());
    let mut config = Config::load_or_default(&config_path)?;
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }

    if let Command::Config { command } = &cli.command {
        return run_config(command, &config, &config_path);
    }

    let backend = create_backend(&config.database_config())
        .with_context(|| format!("Failed to open database {:?}", config.database))?;
    let documents = FsDocumentStore::new(&config.documents_dir);
    let generator = Generator::new(Box::new(AiClient::from_config(&config.ai)));
    let audit = LogAuditSink;

    let mut pipeline = Pipeline::new(&documents, &generator, backend.as_ref(), &audit);
    if let Ok(user) = std::env::var("USER") {
        pipeline = pipeline.with_user(user);
    }

    match &cli.command {
        Command::Upload { file, reference } => {
            let reference = upload(&documents, file, reference.as_deref())?;
            println!("{} {}", "Uploaded".green(), reference);
        }
        Command::Generate { reference, file } => {
            let reference = match (reference, file) {
                (_, Some(file)) => upload(&documents, file, None)?,
                (Some(reference), None) => DocumentRef::new(reference.as_str()),
                (None, None) => anyhow::bail!("Provide a document reference or --file"),
            };
            println!(
                "Generating test cases for {} using {}",
                reference.to_string().bold(),
                generator.model_description()
            );
            let report = pipeline.run_generation(&reference)?;
            print_report(&report);
        }
        Command::Regenerate {
            requirement_id,
            clarify,
        } => {
            let existing = backend.list_test_cases_for(requirement_id)?;
            if existing.is_empty() {
                println!(
                    "{}",
                    format!("No test cases stored for {}.", requirement_id).yellow()
                );
                return Ok(());
            }

            let clarifications = match clarify {
                Some(text) => text.clone(),
                None => match prompts::prompt_clarifications(&existing)? {
                    Some(text) => text,
                    None => {
                        println!("Regeneration cancelled.");
                        return Ok(());
                    }
                },
            };

            let report = pipeline.run_regeneration(&existing, &clarifications)?;
            print_report(&report);
        }
        Command::Status {
            test_case_id,
            status,
        } => {
            let status: TestCaseStatus = status.parse()?;
            match pipeline.record_status(test_case_id, status)? {
                Some(entry) => println!(
                    "{} is {}; {} is now {}",
                    test_case_id,
                    colorize_status(status),
                    entry.requirement_id,
                    colorize_coverage(entry.status)
                ),
                None => println!(
                    "{} is {} (not linked to a requirement)",
                    test_case_id,
                    colorize_status(status)
                ),
            }
        }
        Command::List { requirement } => {
            list_test_cases(backend.as_ref(), requirement.as_deref())?;
        }
        Command::Matrix { json } => {
            show_matrix(backend.as_ref(), *json)?;
        }
        // Handled before the database is opened
        Command::Config { .. } => {}
    }

    Ok(())
}

fn run_config(command: &ConfigCommand, config: &Config, path: &Path) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            println!("# {}", path.display());
            print!("{}", serde_yaml::to_string(config)?);
        }
        ConfigCommand::Init => {
            if Config::create_default(path)? {
                println!("{} {}", "Created".green(), path.display());
            } else {
                println!("{} already exists", path.display());
            }
        }
    }
    Ok(())
}

/// Copies a local file into the document store
fn upload(documents: &dyn DocumentStore, file: &Path, reference: Option<&str>) -> Result<DocumentRef> {
    let bytes = fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    let name = match reference {
        Some(reference) => reference.to_string(),
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .context("File name is not valid UTF-8")?
            .to_string(),
    };
    documents.write(&bytes, &name)
}

fn print_report(report: &GenerationReport) {
    println!("{} {}", "Generation".bold(), report.generation_id);
    if report.degraded {
        println!(
            "{} {}",
            "Warning: fallback test cases were used:".yellow().bold(),
            report.degraded_reason.as_deref().unwrap_or("model output unavailable")
        );
    }

    for case in &report.test_cases {
        println!(
            "  {:<16} {:<10} {:<10} {}",
            case.test_case_id,
            case.requirement_id,
            colorize_priority(case.priority),
            case.title
        );
    }

    if report.success {
        println!(
            "{} {} test cases, {} requirements traced",
            "Done:".green(),
            report.test_cases.len(),
            report.traceability.len()
        );
    } else {
        println!(
            "{} traceability not updated for {}",
            "Partial:".red(),
            report.failed_requirements.join(", ")
        );
    }
}

fn list_test_cases(backend: &dyn DatabaseBackend, requirement: Option<&str>) -> Result<()> {
    let cases = match requirement {
        Some(requirement_id) => backend.list_test_cases_for(requirement_id)?,
        None => backend.list_test_cases()?,
    };

    if cases.is_empty() {
        println!("{}", "No test cases found.".yellow());
        return Ok(());
    }

    println!(
        "{:<16} | {:<10} | {:<40} | {:<10} | {:<12} | {:<16}",
        "ID", "Req", "Title", "Priority", "Status", "Updated"
    );
    println!("{}", "-".repeat(118));

    for case in cases {
        let title = if case.title.chars().count() > 40 {
            format!("{}...", case.title.chars().take(37).collect::<String>())
        } else {
            case.title.clone()
        };
        println!(
            "{:<16} | {:<10} | {:<40} | {:<10} | {:<12} | {:<16}",
            case.test_case_id,
            case.requirement_id,
            title,
            colorize_priority(case.priority),
            colorize_status(case.status),
            case.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn show_matrix(backend: &dyn DatabaseBackend, json: bool) -> Result<()> {
    let entries = backend.list_entries()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("{}", "Traceability matrix is empty.".yellow());
        return Ok(());
    }

    println!(
        "{:<12} | {:<18} | {:<30} | {}",
        "Requirement", "Coverage", "Test Cases", "Compliance"
    );
    println!("{}", "-".repeat(100));
    for entry in &entries {
        println!(
            "{:<12} | {:<18} | {:<30} | {}",
            entry.requirement_id,
            colorize_coverage(entry.status),
            entry.test_case_ids.iter().cloned().collect::<Vec<_>>().join(", "),
            entry
                .compliance_references
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let stats = backend.stats()?;
    println!(
        "\n{} requirements: {} fully, {} partially, {} not tested ({} test cases, {})",
        stats.requirement_count,
        stats.fully_tested,
        stats.partially_tested,
        stats.not_tested,
        stats.test_case_count,
        stats.backend_type
    );
    Ok(())
}

fn colorize_priority(priority: Priority) -> colored::ColoredString {
    match priority {
        Priority::Critical => "Critical".red().bold(),
        Priority::High => "High".red(),
        Priority::Medium => "Medium".yellow(),
        Priority::Low => "Low".green(),
    }
}

fn colorize_status(status: TestCaseStatus) -> colored::ColoredString {
    match status {
        TestCaseStatus::NotTested => "Not Tested".normal(),
        TestCaseStatus::Passed => "Passed".green(),
        TestCaseStatus::Failed => "Failed".red(),
        TestCaseStatus::Blocked => "Blocked".yellow(),
    }
}

fn colorize_coverage(status: CoverageStatus) -> colored::ColoredString {
    match status {
        CoverageStatus::NotTested => "Not Tested".red(),
        CoverageStatus::PartiallyTested => "Partially Tested".yellow(),
        CoverageStatus::FullyTested => "Fully Tested".green(),
    }
}
