mod admin;
mod backup;
mod config;
mod db;
mod error;
mod http;
mod ipc;
mod lifecycle;
mod model;
mod queries;
mod reset;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "retirosd", version, about = "School pickup desk service")]
struct Cli {
    /// Configuration file (defaults to ./retiros.toml when present).
    #[arg(long, global = true, env = "RETIROS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the desk over HTTP.
    Serve,
}

fn init_tracing(default_filter: &str) {
    // stdout carries IPC responses.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let config = match config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("retirosd: invalid configuration: {e:#}");
            std::process::exit(2);
        }
    };
    init_tracing(&config.log);
    tracing::info!("retirosd v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Some(Command::Serve) => run_http(&config),
        None => run_sidecar(&config),
    };
    if let Err(e) = result {
        tracing::error!(error = %format!("{e:#}"), "retirosd stopped");
        std::process::exit(1);
    }
}

fn run_http(config: &config::Config) -> anyhow::Result<()> {
    let Some(workspace) = config.workspace.as_deref() else {
        anyhow::bail!("serve needs a workspace: set `workspace` or RETIROS_WORKSPACE");
    };
    http::serve(workspace, &config.http)
}

fn run_sidecar(config: &config::Config) -> anyhow::Result<()> {
    let mut state = ipc::AppState::empty();
    if let Some(workspace) = config.workspace.as_deref() {
        state.db = Some(db::open_db(workspace)?);
        state.workspace = Some(workspace.to_path_buf());
        tracing::info!(workspace = %workspace.display(), "workspace opened");
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{resp}");
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(stdout, "{resp}");
        let _ = stdout.flush();
    }
    Ok(())
}
