//! Ferry forum-to-chat event relay.
//!
//! Command-line entry point. Loads configuration, wires the dispatcher to the
//! HTTP transport and runs one of the relay commands.

mod config;

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ferry_core::{origin::is_chat_origin, EventPayload, RealClock, StaticSettings};
use ferry_dispatch::{DeliveryClient, DeliveryHandle, DispatchError, Dispatcher};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::config::{Config, LogFormat, CONFIG_FILE};

/// Time allowed for queued events to finish after input ends or a shutdown
/// signal arrives.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "ferry", version, about = "Relays forum events to a chat integration endpoint")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, env = "FERRY_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Queue a single event and wait for its delivery.
    Send {
        /// Dotted event name, e.g. `topic.create`.
        #[arg(long)]
        event_type: String,
        /// Event data as a JSON object.
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// Relay newline-delimited `{"eventType", "data"}` objects read from stdin.
    Relay,
    /// Send a test event directly and print the connection report.
    TestConnection,
    /// Print the effective settings and circuit state.
    State,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    init_tracing(&config)?;

    info!(
        enabled = config.enabled,
        endpoint_url = %config.endpoint_url,
        api_key = %config.api_key_masked(),
        max_queue_size = config.max_queue_size,
        "configuration loaded"
    );

    let dispatcher = build_dispatcher(&config)?;

    match cli.command {
        Command::Send { event_type, data } => send(&dispatcher, event_type, &data).await,
        Command::Relay => relay(&dispatcher).await,
        Command::TestConnection => test_connection(&dispatcher).await,
        Command::State => state(&dispatcher, &config),
    }
}

/// Initializes tracing with environment-based configuration.
///
/// `RUST_LOG` takes precedence over the configured filter. Logs go to stderr so
/// command output on stdout stays machine-readable.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("invalid log filter")?;

    let (pretty, json) = match config.log_format {
        LogFormat::Pretty => {
            (Some(fmt::layer().with_writer(std::io::stderr).with_target(true)), None)
        },
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .try_init()
        .context("failed to install tracing subscriber")
}

fn build_dispatcher(config: &Config) -> Result<Dispatcher> {
    let settings = StaticSettings::new(config.to_settings());
    let client = DeliveryClient::new(config.to_client_config())
        .context("failed to create delivery client")?;

    Ok(Dispatcher::with_config(
        Arc::new(settings),
        Arc::new(client),
        Arc::new(RealClock::new()),
        config.to_dispatch_config(),
    ))
}

async fn send(dispatcher: &Dispatcher, event_type: String, data: &str) -> Result<ExitCode> {
    let data: Value = serde_json::from_str(data).context("--data must be valid JSON")?;
    let payload = EventPayload::new(event_type, data);

    match dispatcher.send_event(payload).await {
        Ok(Some(response)) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        },
        Ok(None) => {
            warn!("relay is disabled or has no endpoint URL, event not sent");
            Ok(ExitCode::SUCCESS)
        },
        Err(e) => {
            error!(error = %e, "event delivery failed");
            Ok(ExitCode::FAILURE)
        },
    }
}

async fn relay(dispatcher: &Dispatcher) -> Result<ExitCode> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut outcomes = JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("relaying events from stdin");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            () = &mut shutdown => {
                info!("shutdown signal received, no longer reading input");
                break;
            },
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let payload = match serde_json::from_str::<EventPayload>(&line) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "skipping malformed event line");
                continue;
            },
        };

        if carries_chat_origin(&payload) {
            debug!(event_type = %payload.event_type, "skipping chat-originated event");
            continue;
        }

        match dispatcher.enqueue(payload).await {
            Ok(Some(handle)) => {
                outcomes.spawn(report_outcome(handle));
            },
            Ok(None) => debug!("relay not configured, event ignored"),
            Err(e) => warn!(error = %e, "event rejected"),
        }
    }

    info!(pending = outcomes.len(), "waiting for queued events");
    let drained = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
        while outcomes.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(abandoned = outcomes.len(), "shutdown grace period expired");
    }

    let stats = dispatcher.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        dropped = stats.dropped,
        circuit_state = %dispatcher.circuit_state(),
        "relay finished"
    );

    Ok(if stats.failed + stats.dropped + stats.circuit_rejections == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn report_outcome(handle: DeliveryHandle) {
    let delivery_id = handle.delivery_id();
    match handle.await {
        Ok(_) => debug!(%delivery_id, "event delivered"),
        Err(DispatchError::CircuitOpen) => warn!(%delivery_id, "event skipped, circuit open"),
        Err(e) => warn!(%delivery_id, error = %e, "event not delivered"),
    }
}

/// True when any string field of the event data carries a chat-origin marker.
fn carries_chat_origin(payload: &EventPayload) -> bool {
    ["content", "title"]
        .into_iter()
        .filter_map(|field| payload.data.get(field).and_then(Value::as_str))
        .any(is_chat_origin)
}

async fn test_connection(dispatcher: &Dispatcher) -> Result<ExitCode> {
    let report = dispatcher.connection_report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn state(dispatcher: &Dispatcher, config: &Config) -> Result<ExitCode> {
    let settings = config.to_settings();
    let state = json!({
        "circuitState": dispatcher.circuit_state(),
        "settings": {
            "enabled": settings.enabled,
            "endpointUrl": settings.endpoint_url,
            "apiKey": config.api_key_masked(),
            "configured": settings.is_configured(),
        },
        "dispatch": dispatcher.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&state)?);

    Ok(ExitCode::SUCCESS)
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C signal");
        },
        () = terminate => {
            info!("received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_send_command() {
        let cli = Cli::parse_from([
            "ferry",
            "send",
            "--event-type",
            "topic.create",
            "--data",
            r#"{"topicId": 1}"#,
        ]);

        match cli.command {
            Command::Send { event_type, data } => {
                assert_eq!(event_type, "topic.create");
                assert_eq!(data, r#"{"topicId": 1}"#);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_config_flag_is_global() {
        let cli = Cli::parse_from(["ferry", "state", "--config", "/etc/ferry.toml"]);

        assert_eq!(cli.config, PathBuf::from("/etc/ferry.toml"));
        assert!(matches!(cli.command, Command::State));
    }

    #[test]
    fn chat_origin_events_are_detected() {
        let echoed = EventPayload::new("post.create", json!({"content": "hi [slack-sync]"}));
        let fresh = EventPayload::new("post.create", json!({"content": "hi", "postId": 3}));
        let opaque = EventPayload::new("topic.delete", json!({"topicId": 3}));

        assert!(carries_chat_origin(&echoed));
        assert!(!carries_chat_origin(&fresh));
        assert!(!carries_chat_origin(&opaque));
    }
}
