//! Stepwise CLI: edit battery test procedures from the command line.
//!
//! Procedures are delimited-text files holding one step per row plus the
//! sweep parameters of impedance steps.
//!
//! # Examples
//!
//! ```bash
//! # Start a procedure from the seed rest step
//! stepwise new formation.csv
//!
//! # Add a charge step in front of the final End step
//! stepwise edit formation.csv -e "insert 2" -e "type 2 Charge" -e "set 2 mode Current"
//!
//! # Show the steps, or check them for dangling references
//! stepwise show formation.csv --format json
//! stepwise check formation.csv
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
mod script;

use output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(author, version, about = "Battery test procedure editor", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Editor configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a new procedure
    New {
        /// Procedure file to create
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the steps of a procedure
    Show {
        /// Procedure file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Check a procedure for structural errors and dangling references
    Check {
        /// Procedure file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Apply editing operations to a procedure and save it
    Edit {
        /// Procedure file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Operation to apply, in order (e.g. "insert 2", "type 2 Charge",
        /// "set 2 end_value 4.2", "undo")
        #[arg(short = 'e', long = "exec", value_name = "OP", required = true)]
        ops: Vec<String>,

        /// Save to this file instead of FILE
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays clean.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::New { file, force } => commands::new::run(file, force, config),
        Commands::Show { file, format } => {
            commands::show::run(file, OutputFormat::from_name(&format), config)
        }
        Commands::Check { file, format } => {
            commands::check::run(file, OutputFormat::from_name(&format), config)
        }
        Commands::Edit { file, ops, output } => commands::edit::run(file, ops, output, config),
    }
}
