use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Generate healthcare test cases from requirements documents and track traceability"
)]
pub struct Cli {
    /// Path to the config file (default: TRACEGEN_CONFIG or the user config dir)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file; .yaml/.yml selects the YAML backend, anything else SQLite
    #[clap(long, global = true)]
    pub database: Option<PathBuf>,

    /// Enable debug logging
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Write a default config file if none exists
    Init,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy a document into the document store
    Upload {
        /// File to upload
        file: PathBuf,

        /// Reference to store it under (default: the file name)
        #[clap(long = "as")]
        reference: Option<String>,
    },

    /// Generate test cases for a stored document
    Generate {
        /// Reference of a stored document
        #[clap(required_unless_present = "file", conflicts_with = "file")]
        reference: Option<String>,

        /// Upload this file first, then generate from it
        #[clap(long)]
        file: Option<PathBuf>,
    },

    /// Regenerate the test cases of a requirement with clarifications
    Regenerate {
        /// Requirement ID (e.g., REQ-010)
        requirement_id: String,

        /// Clarifications for the model (prompted for when omitted)
        #[clap(long)]
        clarify: Option<String>,
    },

    /// Record the execution status of a test case
    Status {
        /// Test case ID
        test_case_id: String,

        /// not-tested, passed, failed or blocked
        status: String,
    },

    /// List stored test cases
    List {
        /// Only test cases linked to this requirement
        #[clap(long)]
        requirement: Option<String>,
    },

    /// Show the traceability matrix
    Matrix {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[clap(subcommand)]
        command: ConfigCommand,
    },
}
