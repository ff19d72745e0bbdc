//! unbox command line entry point.

// The CLI is the one place allowed to write to the console
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod commands;
mod tracing;

use std::io::Write;

use ::tracing::{info, info_span, Instrument};
use miette::Report;
use tokio_util::sync::CancellationToken;
use unbox_core::{Error, Progress};

use crate::cli::{Cli, Commands};
use crate::tracing::{TracingConfig, TracingFormat};

/// Successful exit
const EXIT_OK: i32 = 0;
/// Resolve or configuration failure
const EXIT_FAILURE: i32 = 1;
/// Interrupted by Ctrl-C
const EXIT_SIGINT: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = cli::parse();

    if let Err(e) = crate::tracing::init_tracing(tracing_config(&cli)) {
        eprintln!("{e:?}");
    }

    std::process::exit(run(cli).await);
}

fn tracing_config(cli: &Cli) -> TracingConfig {
    TracingConfig {
        format: if cli.json {
            TracingFormat::Json
        } else {
            TracingFormat::Compact
        },
        level: cli.level.into(),
    }
}

/// Run a command, cancelling it on Ctrl-C, and map the outcome to an exit code.
async fn run(cli: Cli) -> i32 {
    let token = CancellationToken::new();
    let watcher = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, cancelling");
            watcher.cancel();
        }
    });

    let json = cli.json;
    let span = info_span!("unbox_run", correlation_id = %crate::tracing::correlation_id());
    match execute(cli.command, Progress::with_token(token), json)
        .instrument(span)
        .await
    {
        Ok(output) => write_output(&mut std::io::stdout().lock(), &output),
        Err(err) => {
            let code = if err.is_cancelled() {
                EXIT_SIGINT
            } else {
                EXIT_FAILURE
            };
            render_error(err, json);
            code
        }
    }
}

/// Write command output; a closed or failing stdout is a failure.
fn write_output(out: &mut impl Write, output: &str) -> i32 {
    match writeln!(out, "{output}").and_then(|()| out.flush()) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("Failed to write output: {e}");
            EXIT_FAILURE
        }
    }
}

async fn execute(command: Commands, progress: Progress, json: bool) -> unbox_core::Result<String> {
    match command {
        Commands::Resolve {
            identifier,
            settings,
        } => commands::resolve(identifier.as_deref(), &settings, &progress, json).await,
        Commands::Fingerprint { file } => commands::fingerprint(&file, json),
        Commands::Config { settings } => commands::config(&settings),
    }
}

/// Render error appropriately based on JSON flag
fn render_error(err: Error, json_mode: bool) {
    if json_mode {
        let envelope = serde_json::json!({
            "error": {
                "code": error_code(&err),
                "message": err.to_string(),
                "cause": err.root().to_string(),
            }
        });
        println!("{envelope}");
    } else {
        // Use miette for human-friendly error display
        eprintln!("{:?}", Report::new(err));
        let _ = std::io::stderr().flush();
    }
}

fn error_code(err: &Error) -> &'static str {
    match err.root() {
        Error::InvalidIdentifier { .. } => "invalid_identifier",
        Error::Fetch { .. } => "fetch",
        Error::Hash { .. } => "hash",
        Error::Extraction { .. } | Error::UnsupportedArchive { .. } => "extraction",
        Error::EntryPointMissing { .. } => "entry_point_missing",
        Error::Cancelled { .. } => "cancelled",
        Error::Io { .. } => "io",
        Error::Configuration { .. } => "config",
        Error::Resolve { .. } => "resolve",
    }
}
