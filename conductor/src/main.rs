//! Symbolic command engine CLI.
//!
//! Drives single round-trips against a state directory: parse a command,
//! start or resume a chain, submit gate verdicts, sweep expiry. The
//! transport layer in production wraps [`conductor::engine::Engine`]
//! directly; this binary exists for local inspection and scripting.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use conductor::catalog::PromptCatalog;
use conductor::engine::{Engine, EngineReply, ExecutionRequest};
use conductor::logging;
use conductor::parser::CommandParser;

const DEMO_CATALOG: &str = include_str!("demo_catalog.json");

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Symbolic command engine for a prompt-template library"
)]
struct Cli {
    /// State directory for sessions, temporary gates and config.
    #[arg(long, default_value = ".conductor", global = true)]
    state_dir: PathBuf,

    /// Prompt catalog (JSON array of definitions). A small demo catalog is
    /// used when omitted.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a command and print its execution plan as JSON.
    Parse { command: String },
    /// Execute one round-trip for a new command.
    Run {
        command: String,
        /// Abort any live run of the same originating prompt first.
        #[arg(long)]
        force_restart: bool,
    },
    /// Resume a chain with the previous step's output.
    Resume {
        chain_id: String,
        #[arg(long)]
        response: String,
    },
    /// Submit a gate verdict, or an escalation action (retry|skip|abort).
    Verdict {
        chain_id: String,
        #[arg(long)]
        verdict: Option<String>,
        #[arg(long)]
        action: Option<String>,
    },
    /// Expire stale sessions and temporary gates now.
    Sweep,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let catalog = load_catalog(cli.catalog.as_deref())?;

    match cli.command {
        Command::Parse { command } => {
            let parsed = CommandParser::new(&catalog).parse(&command)?;
            println!("{}", serde_json::to_string_pretty(&parsed.plan)?);
        }
        Command::Run {
            command,
            force_restart,
        } => {
            let engine = Engine::open(&cli.state_dir, catalog)?;
            let reply = engine.handle(&ExecutionRequest {
                command: Some(command),
                force_restart,
                ..ExecutionRequest::default()
            })?;
            print_reply(&reply)?;
        }
        Command::Resume { chain_id, response } => {
            let engine = Engine::open(&cli.state_dir, catalog)?;
            let reply = engine.handle(&ExecutionRequest::resume(&chain_id, &response))?;
            print_reply(&reply)?;
        }
        Command::Verdict {
            chain_id,
            verdict,
            action,
        } => {
            let engine = Engine::open(&cli.state_dir, catalog)?;
            let reply = engine.handle(&ExecutionRequest {
                chain_id: Some(chain_id),
                gate_verdict: verdict,
                gate_action: action,
                ..ExecutionRequest::default()
            })?;
            print_reply(&reply)?;
        }
        Command::Sweep => {
            let engine = Engine::open(&cli.state_dir, catalog)?;
            let report = engine.sweep()?;
            println!(
                "expired {} session(s), removed {} temporary gate(s)",
                report.sessions_expired, report.gates_removed
            );
        }
    }
    Ok(())
}

fn load_catalog(path: Option<&std::path::Path>) -> Result<PromptCatalog> {
    match path {
        Some(path) => PromptCatalog::load(path),
        None => {
            let definitions =
                serde_json::from_str(DEMO_CATALOG).context("parse embedded demo catalog")?;
            Ok(PromptCatalog::new(definitions))
        }
    }
}

fn print_reply(reply: &EngineReply) -> Result<()> {
    println!("{}", reply.content);
    if let Some(chain) = &reply.chain {
        println!("\n--- chain ---");
        println!("{}", serde_json::to_string_pretty(chain)?);
    }
    Ok(())
}
