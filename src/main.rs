// Clippy configuration: enable pedantic but allow overly strict lints
#![allow(clippy::missing_errors_doc)] // Internal functions don't need # Errors docs
#![allow(clippy::missing_panics_doc)] // Internal functions don't need # Panics docs
#![allow(clippy::must_use_candidate)] // Not all getters need #[must_use]
#![allow(clippy::module_name_repetitions)] // e.g., SessionState in session module is fine
#![allow(clippy::doc_markdown)] // Don't require backticks around D-Bus, JSON, etc.
#![allow(clippy::significant_drop_tightening)] // Lock guard drops are intentional
#![allow(clippy::redundant_closure_for_method_calls)] // Sometimes closures are clearer
#![allow(clippy::match_same_arms)] // Explicit arms are clearer than combined patterns
#![allow(clippy::single_match_else)] // match with else is fine for Result handling
#![allow(clippy::option_if_let_else)] // if-let is more readable for Option handling
#![allow(clippy::needless_pass_by_value)] // PathBuf by value is fine for config loading

//! Beckon - desktop notifications for shell scripts
//!
//! Delivers a notification and, when the caller needs the user's reaction,
//! blocks until the user clicks, picks an action, replies, closes it, or the
//! timeout passes. The result is printed as a plain tag or a JSON object.
//!
//! Usage:
//!   beckon deliver -m "Build finished" --actions Deploy,Skip --json
//!   echo "Backup done" | beckon
//!   beckon list ALL
//!   beckon remove ci

mod cli;
mod config;
mod dispatch;
mod errors;
mod output;
mod registry;
mod request;
mod session;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use color_eyre::Result;
use config::BeckonConfig;
use dispatch::{ActionDispatcher, SystemWorkspace, Workspace};
use errors::{BeckonError, EXIT_FAILURE, EXIT_SUCCESS};
use output::Rendered;
use registry::desktop::DesktopRegistry;
use registry::NotificationRegistry;
use request::{DeliverRequest, Request};
use session::{Outcome, SessionCoordinator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Get the log directory path
fn get_log_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || std::env::temp_dir().join("beckon").join("logs"),
        |dirs| dirs.cache_dir().join("beckon").join("logs"),
    )
}

/// Print a diagnostic (and the help banner for usage errors)
fn report_error(error: &BeckonError) -> ExitCode {
    tracing::warn!(error = %error, "Invocation failed");
    eprintln!("{error}");
    if error.wants_help() {
        cli::print_help();
    }
    ExitCode::from(error.exit_code())
}

/// Fire the activation's side effects and render the session's result
fn conclude<W: Workspace>(
    outcome: &Outcome,
    request: &DeliverRequest,
    workspace: W,
) -> errors::Result<Rendered> {
    let action = match outcome {
        Outcome::Activated(kind) => {
            let result = ActionDispatcher::new(workspace).dispatch(kind, request);
            if let Some(effect) = &result.side_effect {
                tracing::debug!(effect = ?effect, failed = result.error.is_some(), "Activation handled");
            }
            Some(result)
        }
        _ => None,
    };
    output::render_outcome(outcome, action.as_ref(), request.json_output)
}

/// Run one delivery session, dispatch its activation, and print the result
async fn deliver(coordinator: &SessionCoordinator, request: DeliverRequest) -> Result<u8> {
    let outcome = coordinator
        .run_deliver(&request, session::shutdown_signal())
        .await;

    // Side effects block on child processes
    let rendered =
        tokio::task::spawn_blocking(move || conclude(&outcome, &request, SystemWorkspace))
            .await??;

    if let Some(line) = &rendered.stdout {
        println!("{line}");
    }
    for line in &rendered.stderr {
        eprintln!("{line}");
    }
    Ok(rendered.exit_code)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments; usage errors exit 1, --help/--version exit 0
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                EXIT_FAILURE
            } else {
                EXIT_SUCCESS
            };
            let _ = e.print();
            return Ok(ExitCode::from(code));
        }
    };

    if let Some(Commands::Completions { shell }) = cli.command {
        cli::print_completions(shell);
        return Ok(ExitCode::SUCCESS);
    }

    // Initialize error handling
    color_eyre::install()?;

    // Setup file logging with rotation; stdout is reserved for results
    let log_dir = get_log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "beckon.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let log_filter = format!("beckon={}", cli.log_level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    tracing::info!("Starting beckon v{}", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.unwrap_or_else(BeckonConfig::default_path);
    let config = BeckonConfig::load_from_path(config_path);

    let request = match Request::from_command(cli.command, &config.defaults, cli::read_piped_message)
    {
        Ok(request) => request,
        Err(e) => return Ok(report_error(&e)),
    };

    let registry = Arc::new(DesktopRegistry::new(request.sender()));

    // Asking the notification server for its identity is a blocking D-Bus call
    let backend = Arc::clone(&registry);
    if let Err(e) = tokio::task::spawn_blocking(move || backend.check_available()).await? {
        return Ok(report_error(&e));
    }

    let coordinator = SessionCoordinator::new(registry);
    let code = match request {
        Request::List { selector, json } => {
            let records = coordinator.run_list(&selector);
            let listing = output::render_list(&records, json)?;
            if !listing.is_empty() {
                println!("{listing}");
            }
            EXIT_SUCCESS
        }
        Request::Remove(selector) => {
            coordinator.run_remove(&selector);
            EXIT_SUCCESS
        }
        Request::Deliver(request) => deliver(&coordinator, *request).await?,
    };

    tracing::debug!(exit_code = code, "Exiting");
    Ok(ExitCode::from(code))
}
