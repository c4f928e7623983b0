//! parley - stdio language server.
//!
//! Speaks LSP over stdin/stdout using the `parley-lsp` engine and answers
//! semantic token requests with a small lexical classifier. Logs never touch
//! stdout: they go to the configured file or to stderr.

mod lexical;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use parley_config::ParleyConfig;
use parley_lsp::Server;

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Language server over stdio")]
struct Cli {
    /// Config file to load instead of the default location.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Log filter directive; overrides RUST_LOG and the config file.
    #[arg(long, value_name = "FILTER")]
    log_filter: Option<String>,
    /// Accepted for editor compatibility; stdin/stdout is the only transport.
    #[arg(long)]
    stdio: bool,
}

fn build_filter(cli: Option<&str>, config: &ParleyConfig) -> EnvFilter {
    if let Some(directive) = cli
        && let Ok(filter) = EnvFilter::try_new(directive)
    {
        return filter;
    }
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log.filter()))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn init_tracing(filter: EnvFilter, config: &ParleyConfig) {
    let mut warnings = Vec::new();

    if let Some(path) = config.log.file_path() {
        match open_log_file(&path) {
            Ok(file) => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                    .with(filter)
                    .init();
                tracing::info!(path = %path.display(), "Logging initialized");
                return;
            }
            Err(e) => warnings.push(format!("Failed to open log file {}: {e}", path.display())),
        }
    }

    // stdout carries the protocol.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    for warning in warnings {
        tracing::warn!("{warning}");
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = match ParleyConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            // Logging is not up yet; report on stderr and bail.
            eprintln!("parley: {err}");
            return Err(err).context("loading configuration");
        }
    };
    init_tracing(build_filter(cli.log_filter.as_deref(), &config), &config);

    let options = config.server_options();
    tracing::info!(
        sync = ?options.sync_kind,
        encodings = ?options.position_encodings,
        stdio_flag = cli.stdio,
        "Starting language server on stdio"
    );

    let server = Server::builder(options)
        .semantic_tokens(lexical::legend(), lexical::tokens)
        .build();
    let status = server
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("serving stdio connection")?;

    tracing::info!(?status, "Language server stopped");
    Ok(ExitCode::from(status.code()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
