//! statechart - command-line front end for the statechart interpreter
//!
//! Validates documents, checks configurations, replays event sequences and
//! offers an interactive REPL.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use statechart_core::EngineConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statechart")]
#[command(about = "Interpreter for hierarchical, parallel statechart documents")]
#[command(version)]
struct Cli {
    /// Engine config file (YAML), defaults to $STATECHART_CONFIG
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl {
        /// Documents to load on startup (name taken from the file stem)
        documents: Vec<PathBuf>,
    },

    /// Parse and validate a document
    Validate {
        /// Document JSON (or @file.json to read from file)
        document: String,
    },

    /// Check whether a set of states is a legal configuration
    Check {
        /// Document JSON (or @file.json to read from file)
        document: String,

        /// State ids making up the candidate configuration
        #[arg(required = true)]
        states: Vec<String>,
    },

    /// Start an instance and feed it a sequence of events
    Run {
        /// Document JSON (or @file.json to read from file)
        document: String,

        /// Events in order, as `name` or `name=<payload json>`
        events: Vec<String>,

        /// Initial datamodel JSON, replacing the document's
        #[arg(long)]
        ctx: Option<String>,

        /// Print each macrostep outcome as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = match EngineConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };
    tracing::debug!(?config, "loaded engine config");

    match cli.command {
        Some(Commands::Repl { documents }) => repl::run(config, &documents)?,
        None => repl::run(config, &[])?,
        Some(cmd) => match commands::execute(cmd, config) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
