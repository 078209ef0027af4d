//! Interactive REPL.

use crate::commands::{format_json, format_outcome, format_reports, load_document, parse_event};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use statechart_core::{is_legal_configuration, CollectingReporter, EngineConfig, StatechartEngine};
use std::path::PathBuf;
use std::sync::Arc;

const HELP_TEXT: &str = r#"
Available commands:
  help                              Show this help

  load <name> <json|@file>          Register a document
  docs                              List documents
  show <name>                       Show a document
  check <name> <state>...           Check a candidate configuration

  create <doc> [id] [ctx_json]      Create and start an instance
  send <id> <event> [payload_json]  Process one external event
  get <id>                          Show instance state
  snapshot <id>                     Show instance snapshot
  delete <id>                       Delete an instance
  list                              List instances

  quit, exit                        Exit the REPL
"#;

struct Session {
    engine: StatechartEngine,
    reporter: Arc<CollectingReporter>,
}

pub fn run(config: EngineConfig, documents: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "statechart REPL".bold().cyan());

    let reporter = Arc::new(CollectingReporter::new());
    let session = Session {
        engine: StatechartEngine::with_reporter(config, reporter.clone()),
        reporter,
    };

    for path in documents {
        let arg = format!("@{}", path.display());
        match load_document(&arg).and_then(|doc| {
            let json = doc.to_json()?;
            session.engine.put_document(&doc.name, &json)?;
            Ok(doc.name)
        }) {
            Ok(name) => println!("{} {}", "Loaded".green(), name.cyan()),
            Err(e) => println!("{}: {}: {}", "Error".red(), path.display(), e),
        }
    }

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".statechart_history"))
        .unwrap_or_else(|_| ".statechart_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "statechart>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&session, line) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
                let reports = session.reporter.take();
                if !reports.is_empty() {
                    print!("{}", format_reports(&reports));
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}

fn execute_repl_command(session: &Session, line: &str) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];
    let engine = &session.engine;

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "load" | "l" => {
            if args.len() < 2 {
                return Ok(Some("Usage: load <name> <json|@file>".to_string()));
            }
            let doc = load_document(&args[1..].join(" "))?;
            let (checksum, created) = engine.put_document(args[0], &doc.to_json()?)?;
            Ok(Some(format!(
                "{} {} (checksum: {})",
                if created { "Created".green() } else { "Exists".yellow() },
                args[0].cyan(),
                checksum
            )))
        }

        "docs" => {
            let names = engine.list_documents();
            if names.is_empty() {
                return Ok(Some("No documents".yellow().to_string()));
            }
            Ok(Some(
                names
                    .iter()
                    .map(|n| format!("  {}", n.cyan()))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ))
        }

        "show" => {
            if args.is_empty() {
                return Ok(Some("Usage: show <name>".to_string()));
            }
            let doc = engine.get_document(args[0])?;
            Ok(Some(format_json(&doc.to_json()?)))
        }

        "check" => {
            if args.len() < 2 {
                return Ok(Some("Usage: check <name> <state>...".to_string()));
            }
            let doc = engine.get_document(args[0])?;
            let ids = args[1..]
                .iter()
                .map(|s| doc.tree.lookup(s))
                .collect::<Result<Vec<_>, _>>()?;
            let verdict = if is_legal_configuration(&doc.tree, ids, session.reporter.as_ref()) {
                "Legal".green()
            } else {
                "Illegal".red()
            };
            Ok(Some(verdict.to_string()))
        }

        "create" | "c" => {
            if args.is_empty() {
                return Ok(Some("Usage: create <doc> [id] [ctx_json]".to_string()));
            }
            let ctx = if args.len() > 2 {
                Some(serde_json::from_str(&args[2..].join(" "))?)
            } else {
                None
            };
            let info = engine.create_instance(args.get(1).copied(), args[0], ctx)?;
            Ok(Some(format!(
                "{} {} (status: {}, configuration: [{}])",
                "Created".green(),
                info.id.cyan(),
                info.status,
                info.configuration.join(", ").yellow()
            )))
        }

        "send" | "s" => {
            if args.len() < 2 {
                return Ok(Some("Usage: send <id> <event> [payload_json]".to_string()));
            }
            let event = if args.len() > 2 {
                parse_event(&format!("{}={}", args[1], args[2..].join(" ")))?
            } else {
                parse_event(args[1])?
            };
            let name = event.name.clone();
            let outcome = engine.send(args[0], event)?;
            let mut output = format_outcome(&name, &outcome, false)?;
            if outcome.terminated {
                output.push_str(&"Terminated".yellow().to_string());
            }
            Ok(Some(output.trim_end().to_string()))
        }

        "get" | "g" => {
            if args.is_empty() {
                return Ok(Some("Usage: get <id>".to_string()));
            }
            let info = engine.get_instance(args[0])?;
            Ok(Some(format!(
                "{} ({})\n  Status: {}\n  Configuration: [{}]\n  Context: {}",
                info.id.cyan(),
                info.document,
                info.status,
                info.configuration.join(", ").yellow(),
                format_json(&info.ctx)
            )))
        }

        "snapshot" => {
            if args.is_empty() {
                return Ok(Some("Usage: snapshot <id>".to_string()));
            }
            let (snapshot, ctx) = engine.snapshot_instance(args[0])?;
            let json = serde_json::json!({"snapshot": snapshot, "ctx": ctx});
            Ok(Some(format_json(&json)))
        }

        "delete" | "d" => {
            if args.is_empty() {
                return Ok(Some("Usage: delete <id>".to_string()));
            }
            engine.delete_instance(args[0])?;
            Ok(Some(format!("{} {}", "Deleted".green(), args[0].cyan())))
        }

        "list" => {
            let ids = engine.list_instance_ids();
            if ids.is_empty() {
                return Ok(Some("No instances".yellow().to_string()));
            }
            let mut output = String::new();
            for id in ids {
                let info = engine.get_instance(&id)?;
                output.push_str(&format!(
                    "  {} {} [{}]\n",
                    id.cyan(),
                    info.document,
                    info.configuration.join(", ")
                ));
            }
            Ok(Some(output.trim_end().to_string()))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}
