//! # onebot-reverse
//!
//! Reverse WebSocket OneBot v11 endpoint. Waits for a bot client to
//! connect, logs every event it pushes and runs until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use onebot_core::Event;
use onebot_server::{Bot, ConnectionEvent, EventKey, ServerConfig};
use onebot_settings::OneBotSettings;
use onebot_telemetry::{LogFormat, TelemetryConfig};

/// OneBot v11 reverse WebSocket server.
#[derive(Parser, Debug)]
#[command(name = "onebot-reverse", about = "OneBot v11 reverse WebSocket server")]
struct Cli {
    /// Settings file (defaults to ~/.onebot/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn or error (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

fn load_settings(cli: &Cli) -> Result<OneBotSettings> {
    let path = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("settings file not found: {}", path.display());
            }
            path.clone()
        }
        None => onebot_settings::settings_path(),
    };
    let mut settings = onebot_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    Ok(settings)
}

fn telemetry_config(settings: &OneBotSettings) -> TelemetryConfig {
    let defaults = TelemetryConfig::default();
    TelemetryConfig {
        log_level: onebot_telemetry::parse_level(&settings.logging.level)
            .unwrap_or(defaults.log_level),
        format: settings
            .logging
            .format
            .parse::<LogFormat>()
            .unwrap_or_default(),
        ..defaults
    }
}

fn server_config(settings: &OneBotSettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        call_timeout_ms: server.call_timeout_ms,
        heartbeat_interval_secs: server.heartbeat_interval_secs,
        max_message_size: server.max_message_size,
        queue_capacity: server.queue_capacity,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    onebot_telemetry::init_telemetry(&telemetry_config(&settings));

    let bot = Bot::new(server_config(&settings));
    let _ = bot.on(EventKey::Any, |event: &Event| {
        tracing::debug!(key = %event.key(), self_id = ?event.self_id(), "event");
        Ok(())
    });

    let mut signals = bot.subscribe();
    let _signal_log = tokio::spawn(async move {
        while let Ok(signal) = signals.recv().await {
            match signal {
                ConnectionEvent::Connected(peer) => {
                    tracing::info!(peer_id = %peer.id, self_id = ?peer.self_id, "bot client online");
                }
                ConnectionEvent::Disconnected(peer) => {
                    tracing::info!(peer_id = %peer.id, self_id = ?peer.self_id, "bot client offline");
                }
            }
        }
    });

    let addr = bot.init().await.context("Failed to start server")?;
    tracing::info!(addr = %addr, "onebot-reverse ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    bot.dispose().await;
    Ok(())
}
