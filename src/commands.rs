//! Command execution.

use crate::Commands;
use colored::Colorize;
use serde_json::Value;
use statechart_core::{
    is_legal_configuration, CollectingReporter, Document, EngineConfig, Event, MacrostepOutcome, Report,
};
use std::path::Path;
use std::sync::Arc;

/// Executes a one-shot command and returns the formatted output.
pub fn execute(cmd: Commands, config: EngineConfig) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl { .. } => unreachable!(),

        Commands::Validate { document } => {
            let doc = load_document(&document)?;
            Ok(format!(
                "{} document {}\n  States: {}\n  Transitions: {}\n  Checksum: {}",
                "Valid".green(),
                doc.name.cyan(),
                doc.tree.len(),
                doc.tree.transition_count(),
                doc.checksum
            ))
        }

        Commands::Check { document, states } => {
            let doc = load_document(&document)?;
            let ids = states
                .iter()
                .map(|s| doc.tree.lookup(s))
                .collect::<Result<Vec<_>, _>>()?;

            let reporter = CollectingReporter::new();
            if is_legal_configuration(&doc.tree, ids, &reporter) {
                Ok(format!("{} configuration [{}]", "Legal".green(), states.join(", ")))
            } else {
                Ok(format!(
                    "{} configuration [{}]\n{}",
                    "Illegal".red(),
                    states.join(", "),
                    format_reports(&reporter.take())
                ))
            }
        }

        Commands::Run {
            document,
            events,
            ctx,
            json,
        } => {
            let doc = load_document(&document)?;
            let reporter = Arc::new(CollectingReporter::new());
            let mut interp = doc.interpreter(reporter.clone(), config);
            if let Some(ctx) = ctx {
                *interp.evaluator_mut() = statechart_core::JsonDataModel::new(parse_json_arg(&ctx)?);
            }

            let mut output = String::new();
            let outcome = interp.start()?;
            output.push_str(&format_outcome("start", &outcome, json)?);
            output.push_str(&format_reports(&reporter.take()));

            for arg in &events {
                let event = parse_event(arg)?;
                let name = event.name.clone();
                let outcome = interp.process_event(event)?;
                output.push_str(&format_outcome(&name, &outcome, json)?);
                output.push_str(&format_reports(&reporter.take()));
                if outcome.terminated {
                    output.push_str(&format!("{}\n", "Terminated".yellow()));
                    break;
                }
            }

            output.push_str(&format!(
                "{}: {}\n{}: {}",
                "Status".bold(),
                interp.status(),
                "Context".bold(),
                format_json(interp.evaluator().ctx())
            ));
            Ok(output)
        }
    }
}

/// Loads a document from inline JSON or @file.json. File documents are named
/// after the file stem unless they carry a name.
pub fn load_document(arg: &str) -> Result<Document, Box<dyn std::error::Error>> {
    let json = parse_json_arg(arg)?;
    let fallback = match arg.strip_prefix('@') {
        Some(path) => Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string(),
        None => "document".to_string(),
    };
    let name = json["name"].as_str().map(str::to_string).unwrap_or(fallback);
    Ok(Document::from_json(name, &json)?)
}

/// Parses `name` or `name=<payload json>`.
pub fn parse_event(arg: &str) -> Result<Event, Box<dyn std::error::Error>> {
    match arg.split_once('=') {
        Some((name, payload)) => Ok(Event::with_data(name, serde_json::from_str(payload)?)),
        None => Ok(Event::new(arg)),
    }
}

/// Parses a JSON argument (either inline JSON or @file.json).
pub fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

pub fn format_outcome(
    label: &str,
    outcome: &MacrostepOutcome,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    if json {
        return Ok(format!("{}\n", serde_json::to_string(outcome)?));
    }
    let mut output = format!(
        "{} ({} microsteps)\n  Configuration: [{}]\n",
        label.cyan(),
        outcome.microsteps,
        outcome.configuration.join(", ").yellow()
    );
    if !outcome.exited.is_empty() {
        output.push_str(&format!("  Exited: {}\n", outcome.exited.join(", ")));
    }
    if !outcome.entered.is_empty() {
        output.push_str(&format!("  Entered: {}\n", outcome.entered.join(", ")));
    }
    Ok(output)
}

pub fn format_reports(reports: &[Report]) -> String {
    reports
        .iter()
        .map(|r| format!("  {} {} ({})\n", r.code.red(), r.detail, r.context))
        .collect()
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
