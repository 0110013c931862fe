mod config;
mod element;
mod host;
mod ipc_server;
mod loader;
mod macros;
mod scheduler;
mod source;
mod streaming;
mod throttle;
mod visibility;

use anyhow::Result;
use common::HostAction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, broadcast};

use crate::host::{BridgeSettings, HostBridge};

/// Capacity of the pushed-action channel, in batches
const ACTION_CHANNEL_CAPACITY: usize = 256;

/// How often idle loops re-check the exit flag
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    // Config is read before the logger exists so its level can apply
    let loaded = config::Config::load();
    let log_level = loaded
        .as_ref()
        .map(|cfg| cfg.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("Starting clipdeck daemon v{}", env!("CARGO_PKG_VERSION"));

    let config_path = config::Config::default_config_path()?;
    log::info!("Looking for config at: {}", config_path.display());

    let config = match loaded {
        Ok(cfg) => {
            log::info!("✓ Configuration loaded successfully");
            log::info!("  Log level: {}", cfg.general.log_level);
            log::info!(
                "  Scheduler band: {:.2}..{:.2} of viewport, throttle {}ms",
                cfg.scheduler.band_start,
                cfg.scheduler.band_end,
                cfg.scheduler.throttle_ms
            );
            log::info!("  Preload: {}", cfg.loader.preload);
            log::info!(
                "  Streaming fallback: {} ({} rule(s))",
                if cfg.streaming.enable_fallback { "enabled" } else { "disabled" },
                cfg.streaming.rules().len()
            );
            cfg
        }
        Err(e) => {
            log::warn!("Failed to load config: {:#}. Using defaults.", e);
            config::Config::default()
        }
    };

    let bridge = HostBridge::new(BridgeSettings::from_config(&config));
    let state = Arc::new(Mutex::new(DaemonState::new(bridge)));
    let (actions_tx, _) = broadcast::channel(ACTION_CHANNEL_CAPACITY);
    let wake = Arc::new(Notify::new());

    // Start IPC server
    let ipc_state = state.clone();
    let ipc_tx = actions_tx.clone();
    let ipc_wake = wake.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::start(ipc_state, ipc_tx, ipc_wake).await {
            log::error!("IPC server error: {}", e);
        }
    });

    // Trailing-edge scheduling passes
    let ticker_state = state.clone();
    let ticker_handle = tokio::spawn(run_ticker(ticker_state, actions_tx, wake));

    // Set up signal handlers
    let signal_state = state.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    log::error!("Failed to set up signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_state.lock().await.should_exit = true;
    });

    // Wait for either task to complete
    tokio::select! {
        _ = ipc_handle => {
            log::info!("IPC server stopped");
        }
        _ = ticker_handle => {
            log::info!("Scheduler ticker stopped");
        }
    }

    log::info!("Daemon shutting down");
    Ok(())
}

/// Run deferred scheduling passes when they become due and push the
/// resulting actions to subscribers.
async fn run_ticker(
    state: Arc<Mutex<DaemonState>>,
    actions_tx: broadcast::Sender<Vec<HostAction>>,
    wake: Arc<Notify>,
) {
    loop {
        let deadline = {
            let state = state.lock().await;
            if state.should_exit {
                break;
            }
            state.bridge.next_deadline()
        };

        let Some(deadline) = deadline else {
            tokio::select! {
                _ = wake.notified() => {}
                _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {}
            }
            continue;
        };

        tokio::select! {
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
            // A command may have moved or cleared the deadline
            _ = wake.notified() => continue,
        }

        let actions = state.lock().await.bridge.poll(Instant::now());
        publish(&actions_tx, actions);
    }
}

/// Push a batch of actions to every subscribed host connection
fn publish(actions_tx: &broadcast::Sender<Vec<HostAction>>, actions: Vec<HostAction>) {
    if actions.is_empty() {
        return;
    }
    log::debug!("Pushing {} action(s) to subscribers", actions.len());
    if actions_tx.send(actions).is_err() {
        log::trace!("No subscribers for pushed actions");
    }
}

/// Shared daemon state
pub struct DaemonState {
    pub should_exit: bool,
    pub start_time: Instant,
    pub bridge: HostBridge,
}

impl DaemonState {
    pub fn new(bridge: HostBridge) -> Self {
        Self {
            should_exit: false,
            start_time: Instant::now(),
            bridge,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
