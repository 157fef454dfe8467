//! Application entry point for the `pulsewatch` monitoring daemon.
//!
//! This binary orchestrates the full startup sequence:
//! - Initializing structured logging/tracing
//! - Loading configuration from an optional JSON file, environment
//!   variables, or `.env`
//! - Assembling the monitor runtime and running it until shutdown
//!
//! # Environment Variables
//! - `PULSEWATCH_DEVICE_MAC` (required unless mock mode) – oximeter address
//! - `PULSEWATCH_PLUG_URL` (optional) – power-meter endpoint
//! - `MOCK_HARDWARE` (optional) – run against synthetic hardware
//! - `PULSEWATCH_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `PULSEWATCH_SPAN_EVENTS` (optional) – span event mode for tracing

use std::{env, io::IsTerminal, path::PathBuf, process::ExitCode};

use dotenvy::dotenv;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use pulsewatch::{config, Monitor};

// ---

#[tokio::main]
async fn main() -> ExitCode {
    // ---
    init_tracing();
    dotenv().ok();

    let args = match Args::parse(env::args().skip(1)) {
        Ok(args) => args,
        Err(usage) => {
            eprintln!("{usage}");
            return ExitCode::FAILURE;
        }
    };

    let mut cfg = match config::load(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    if args.mock {
        cfg.mock_mode = true;
    }
    cfg.log_config();

    let monitor = Monitor::new(cfg);
    match monitor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("monitor failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

// ---

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    mock: bool,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        // ---
        let usage = "usage: pulsewatch [--config <path>] [--mock]";
        let mut parsed = Args::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().ok_or_else(|| usage.to_string())?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--mock" => parsed.mock = true,
                "--help" | "-h" => return Err(usage.to_string()),
                other => return Err(format!("unknown argument: {other}\n{usage}")),
            }
        }
        Ok(parsed)
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// - Color output controlled by TTY detection and the `FORCE_COLOR` env var
/// - Span event emission controlled by `PULSEWATCH_SPAN_EVENTS`
///   (`"full"`, `"enter_exit"`, default: CLOSE only)
/// - Log level from `RUST_LOG` if set, else `PULSEWATCH_LOG_LEVEL`
///
/// Called once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("PULSEWATCH_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to PULSEWATCH_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("PULSEWATCH_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},btleplug=warn,reqwest=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
