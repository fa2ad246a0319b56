//! # evalmux
//!
//! Line-oriented front end for a session coordinator driving the scripted
//! mock engine. Each stdin line becomes one submitted request.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use evalmux_core::{SessionError, SessionEvent};
use evalmux_session::{MockEngine, MockEngineConfig, SessionConfig, SessionCoordinator, SubmitOptions};
use evalmux_settings::{EvalmuxSettings, LoggingSettings};
use evalmux_telemetry::{init_telemetry, TelemetryConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument, Level};

#[derive(Parser, Debug)]
#[command(name = "evalmux", about = "Multiplex requests onto a re-entrant interactive engine")]
struct Cli {
    /// Settings file (defaults to `~/.evalmux/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Submit requests invisibly: no events, output printed on completion.
    #[arg(long)]
    hidden: bool,

    /// Log as JSON lines (overrides settings).
    #[arg(long)]
    json_logs: bool,
}

/// Map logging settings onto the telemetry config. Returns the directives
/// that failed to parse so they can be reported once logging is up.
fn telemetry_config(logging: &LoggingSettings) -> (TelemetryConfig, Vec<String>) {
    let mut rejected = Vec::new();
    let log_level = logging.level.parse().unwrap_or_else(|_| {
        rejected.push(format!("logging.level={}", logging.level));
        Level::INFO
    });
    let module_levels = logging
        .modules
        .iter()
        .filter_map(|(module, level)| match level.parse::<Level>() {
            Ok(level) => Some((module.clone(), level)),
            Err(_) => {
                rejected.push(format!("logging.modules.{module}={level}"));
                None
            }
        })
        .collect();
    let config = TelemetryConfig {
        log_level,
        module_levels,
        json: logging.json,
        recent_capacity: logging.recent_capacity,
    };
    (config, rejected)
}

fn session_config(settings: &EvalmuxSettings) -> SessionConfig {
    SessionConfig {
        event_capacity: settings.session.event_capacity,
        internal_frames: settings.session.internal_frames.clone(),
    }
}

/// Mirror session events onto the terminal until the session goes away.
async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::BeforeRequest { prompt, .. }) => {
                print!("{prompt}");
                let _ = std::io::stdout().flush();
            }
            Ok(SessionEvent::Response { message, .. }) => print!("{message}"),
            Ok(SessionEvent::Error { message, .. }) => eprint!("{message}"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn report(response: evalmux_session::PendingResponse, hidden: bool) {
    match response.await {
        Ok(output) if hidden => print!("{output}"),
        Ok(output) => debug!(bytes = output.len(), "request completed"),
        Err(SessionError::Engine { output }) if hidden => eprint!("{output}"),
        Err(err) => debug!(error = %err, kind = err.error_kind(), "request ended without output"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(evalmux_settings::settings_path);
    let mut settings = evalmux_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if cli.json_logs {
        settings.logging.json = true;
    }

    let (telemetry, rejected) = telemetry_config(&settings.logging);
    let telemetry = init_telemetry(telemetry);
    for directive in rejected {
        warn!(%directive, "ignoring invalid log level");
    }
    info!(path = %path.display(), hidden = cli.hidden, "starting evalmux");

    let (handle, callbacks) = SessionCoordinator::new(session_config(&settings)).split();
    let printer = tokio::spawn(print_events(handle.subscribe()));
    let engine = tokio::spawn(
        MockEngine::new(
            callbacks,
            MockEngineConfig {
                prompt: settings.engine.prompt.clone(),
                max_length: settings.engine.max_length,
            },
        )
        .run(),
    );

    // Lines are typed against whatever prompt comes next, so they are not
    // bound to the depth current at read time.
    let options = if cli.hidden {
        SubmitOptions::hidden()
    } else {
        SubmitOptions::default()
    }
    .unbound();

    let mut responses = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let request = match handle.submit(options).await {
            Ok(request) => request,
            Err(SessionError::Closed) => break,
            Err(err) => return Err(err).context("Failed to submit request"),
        };
        let span = tracing::info_span!("request", request_id = %request.id(), depth = request.depth());
        let response = request.send(line);
        responses.spawn(report(response, cli.hidden).instrument(span));
    }

    match handle.submit(options).await {
        Ok(request) => {
            responses.spawn(report(request.send("q()"), cli.hidden));
        }
        Err(err) => debug!(error = %err, "engine already gone at end of input"),
    }
    drop(handle);

    engine
        .await
        .context("Mock engine task panicked")?
        .context("Mock engine failed")?;
    while responses.join_next().await.is_some() {}
    printer.await.context("Event printer panicked")?;

    let warnings = telemetry.recent_logs().len();
    if warnings > 0 {
        info!(warnings, "session finished with warnings");
    }
    Ok(())
}
