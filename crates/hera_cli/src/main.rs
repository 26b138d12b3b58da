//! `hera` command line entry point.
//!
//! # Responsibility
//! - Read one request envelope (file or stdin) and dispatch it for a noun.
//! - Print the response envelope as JSON on stdout.
//!
//! # Invariants
//! - Exit status is non-zero whenever the response reports `success: false`.

use clap::Parser;
use hera_core::{
    init_from_config, open_db, open_db_in_memory, EngineConfig, Noun, Orchestrator,
    ResponseEnvelope,
};
use log::info;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "hera")]
#[command(about = "Universal business data engine CRUD envelope runner")]
#[command(version)]
struct Args {
    /// Resource family: entity, relationship, transaction or organization.
    noun: String,

    /// Request envelope file; stdin when omitted or `-`.
    request: Option<PathBuf>,

    /// Engine configuration file (TOML).
    #[arg(long, env = "HERA_CONFIG")]
    config: Option<PathBuf>,

    /// Database file; overrides the configured path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Pretty-print the response.
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(response) => {
            let rendered = if args.pretty {
                serde_json::to_string_pretty(&response)
            } else {
                serde_json::to_string(&response)
            };
            match rendered {
                Ok(text) => println!("{text}"),
                Err(err) => {
                    eprintln!("hera: failed to render response: {err}");
                    return ExitCode::FAILURE;
                }
            }
            if response.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(message) => {
            eprintln!("hera: {message}");
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> Result<ResponseEnvelope, String> {
    let noun = Noun::parse(&args.noun).ok_or_else(|| {
        format!(
            "unknown noun `{}`; expected entity|relationship|transaction|organization",
            args.noun
        )
    })?;

    let mut config = EngineConfig::load(args.config.as_deref()).map_err(|err| err.to_string())?;
    if let Some(db) = args.db.clone() {
        config.database_path = Some(db);
    }
    init_from_config(&config).map_err(|err| err.to_string())?;

    let raw = read_request(args.request.as_deref())?;
    let registry = config.build_registry().map_err(|err| err.to_string())?;
    let conn = match config.database_path.as_deref() {
        Some(path) => open_db(path),
        None => open_db_in_memory(),
    }
    .map_err(|err| format!("failed to open database: {err}"))?;

    info!(
        "event=cli_request module=cli status=start noun={}",
        noun.as_str()
    );
    let orchestrator = Orchestrator::new(&conn, &registry).with_page_limits(config.page_limits());
    Ok(orchestrator.dispatch_json(noun, &raw))
}

fn read_request(path: Option<&std::path::Path>) -> Result<String, String> {
    match path {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .map_err(|err| format!("failed to read `{}`: {err}", path.display())),
        _ => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .map_err(|err| format!("failed to read stdin: {err}"))?;
            Ok(raw)
        }
    }
}
