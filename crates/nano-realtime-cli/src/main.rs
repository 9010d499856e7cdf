//! # nanodesigner-realtime
//!
//! Connects to the NanoDesigner realtime endpoint, optionally watches render
//! jobs, and prints inbound messages until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nano_core::ids::JobId;
use nano_realtime::{ConnectionManager, JobSubscription, LifecycleEvent, Message};
use nano_settings::PRODUCTION_RECONNECT_INTERVAL_MS;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// NanoDesigner realtime client.
#[derive(Parser, Debug)]
#[command(name = "nanodesigner-realtime", about = "NanoDesigner realtime client")]
struct Cli {
    /// WebSocket endpoint (overrides settings and `NANO_WS_URL`).
    #[arg(long)]
    url: Option<String>,

    /// Settings file (default `~/.nanodesigner/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Watch a render job. Repeatable.
    #[arg(long = "job", value_name = "JOB_ID")]
    jobs: Vec<String>,

    /// Print messages of this kind. Repeatable. Defaults to every message
    /// unless `--job` is given.
    #[arg(long = "topic", value_name = "KIND")]
    topics: Vec<String>,

    /// Send a message once connected, as `KIND=JSON`. Repeatable.
    #[arg(long = "send", value_name = "KIND=JSON", value_parser = parse_send)]
    sends: Vec<(String, Value)>,

    /// Use the deployed dashboard's reconnect interval.
    #[arg(long)]
    production: bool,

    /// Print raw JSON frames instead of one summary line per message.
    #[arg(long)]
    json: bool,
}

fn parse_send(arg: &str) -> std::result::Result<(String, Value), String> {
    let (kind, payload) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KIND=JSON, got `{arg}`"))?;
    if kind.is_empty() {
        return Err("message kind must not be empty".to_string());
    }
    let payload = serde_json::from_str(payload).map_err(|e| format!("invalid JSON payload: {e}"))?;
    Ok((kind.to_string(), payload))
}

fn format_message(message: &Message, json: bool) -> String {
    if json {
        return message
            .encode()
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
    }
    let at = message
        .sent_at()
        .map_or_else(|| "-".to_string(), |t| t.format("%H:%M:%S%.3f").to_string());
    format!("{at} {} {}", message.kind(), message.payload())
}

fn log_lifecycle(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Connected => info!("connected"),
        LifecycleEvent::Disconnected {
            code,
            reason,
            intentional,
        } => info!(code, reason = %reason, intentional, "disconnected"),
        LifecycleEvent::ReconnectScheduled { attempt, delay } => {
            info!(attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "reconnecting");
        }
        LifecycleEvent::ReconnectAbandoned { attempts } => {
            warn!(attempts, "gave up reconnecting");
        }
        LifecycleEvent::ConnectFailed { error } => warn!(error = %error, "connect failed"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings.clone().unwrap_or_else(nano_settings::settings_path);
    let mut settings = nano_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    if let Some(url) = args.url {
        settings.realtime.url = url;
    }
    if args.production {
        settings.realtime.reconnect_interval_ms = PRODUCTION_RECONNECT_INTERVAL_MS;
    }
    nano_logging::init(&settings.logging);
    settings.validate().context("Invalid settings")?;

    let reconnect = settings.realtime.reconnect;
    let url = settings.realtime.url.clone();
    let manager = ConnectionManager::websocket(settings.realtime);

    let mut lifecycle = manager.lifecycle_events();
    let lifecycle_task = tokio::spawn(async move {
        loop {
            match lifecycle.recv().await {
                Ok(event) => log_lifecycle(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "lifecycle events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let json = args.json;
    let mut topics = args.topics;
    if topics.is_empty() && args.jobs.is_empty() {
        topics.push("*".to_string());
    }
    let subscriptions: Vec<_> = topics
        .iter()
        .map(|topic| {
            manager.subscribe(topic.as_str(), move |m: &Message| {
                println!("{}", format_message(m, json));
            })
        })
        .collect();
    let jobs: Vec<_> = args
        .jobs
        .into_iter()
        .map(|id| {
            JobSubscription::subscribe(&manager, JobId::from(id), move |event| {
                let line = format_message(event.message(), json);
                if event.is_error() {
                    eprintln!("{line}");
                } else {
                    println!("{line}");
                }
            })
        })
        .collect();

    for (kind, payload) in args.sends {
        manager.send(kind, payload);
    }

    match manager.connect().await {
        Ok(()) => info!(url = %url, "listening, press ctrl-c to exit"),
        Err(e) if reconnect => warn!(error = %e, "initial connect failed, retrying in background"),
        Err(e) => {
            manager.dispose().await;
            return Err(e).with_context(|| format!("Failed to connect to {url}"));
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    for job in &jobs {
        let _ = job.unsubscribe();
    }
    for subscription in &subscriptions {
        let _ = subscription.unsubscribe();
    }
    manager.dispose().await;
    lifecycle_task.abort();
    Ok(())
}
