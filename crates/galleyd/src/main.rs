//! galleyd - The galley kitchen service
//!
//! This is the main entry point for the galleyd service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization and order recovery
//! - Order backend (HTTP, or none for an offline kitchen)
//! - Kitchen engine and its tick loop
//! - Periodic backend sync
//! - IPC server

use anyhow::{Context, Result};
use clap::Parser;
use galley_api::{ErrorCode, ErrorInfo, Event, EventPayload, Response};
use galley_backend::OrderBackend;
use galley_backend_http::HttpBackend;
use galley_config::{load_config, KitchenConfig};
use galley_core::KitchenEngine;
use galley_ipc::{IpcServer, ServerMessage};
use galley_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use galley_util::{database_path, default_config_path, ClientId, RateLimiter, SystemClock};
use galleyd::Kitchen;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// galleyd - Kitchen order timers and status tracking
#[derive(Parser, Debug)]
#[command(name = "galleyd")]
#[command(about = "Kitchen order timers and status tracking", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/galley/config.toml)
    #[arg(short, long, env = "GALLEY_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set GALLEY_SOCKET env var)
    #[arg(short, long, env = "GALLEY_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set GALLEY_DATA_DIR env var)
    #[arg(short, long, env = "GALLEY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    kitchen: Arc<Kitchen>,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    tick_interval: Duration,
    sync_interval: Option<Duration>,
    rate_limiter: RateLimiter<ClientId>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let config = if args.config.exists() {
            let config = load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?;
            info!(
                config_path = %args.config.display(),
                workstation_count = config.workstations.len(),
                "Configuration loaded"
            );
            config
        } else {
            warn!(
                config_path = %args.config.display(),
                "No configuration file, using defaults"
            );
            KitchenConfig::default()
        };

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| config.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| config.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = database_path(&data_dir);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let backend: Option<Arc<dyn OrderBackend>> = match HttpBackend::from_config(&config.backend)
            .context("Failed to create order backend")?
        {
            Some(http) => {
                info!(base_url = http.base_url(), "Order backend configured");
                Some(Arc::new(http))
            }
            None => {
                info!("No order backend configured, running offline");
                None
            }
        };

        let tick_interval = config.service.tick_interval;
        let sync_interval = config.service.sync_interval;
        let tick_without_subscribers = config.service.tick_without_subscribers;

        let engine = KitchenEngine::new(config, store.clone());
        let kitchen = Kitchen::new(engine, store.clone(), backend, Arc::new(SystemClock))
            .with_config_path(&args.config);

        let restored = kitchen.restore().await.context("Failed to restore orders")?;
        info!(order_count = restored, "Orders restored from store");

        if tick_without_subscribers {
            kitchen.hold_ticks().await;
        }

        if let Err(e) = kitchen.sync().await {
            warn!(error = %e, "Initial sync failed, serving stored orders");
        }

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        // 30 requests per second per client
        let rate_limiter = RateLimiter::new(30, Duration::from_secs(1));

        Ok(Self {
            kitchen: Arc::new(kitchen),
            ipc: Arc::new(ipc),
            store,
            tick_interval,
            sync_interval,
            rate_limiter,
        })
    }

    async fn run(mut self) -> Result<()> {
        let mut ipc_messages = self
            .ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let ipc_accept = self.ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        let mut tick_timer = tokio::time::interval(self.tick_interval);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut sync_timer = self.sync_interval.map(|every| {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                // SIGHUP: re-read configuration
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    match self.kitchen.reload_config().await {
                        Ok(events) => self.broadcast(events),
                        Err(e) => warn!(error = %e.message, "Configuration not reloaded"),
                    }
                }

                _ = tick_timer.tick() => {
                    let events = self.kitchen.tick().await;
                    self.broadcast(events);
                }

                _ = next_sync(&mut sync_timer) => {
                    let kitchen = self.kitchen.clone();
                    let ipc = self.ipc.clone();
                    tokio::spawn(async move {
                        match kitchen.sync().await {
                            Ok(events) => {
                                for event in events {
                                    ipc.broadcast_event(event);
                                }
                            }
                            Err(e) => debug!(error = %e, "Periodic sync failed"),
                        }
                    });
                }

                Some(msg) = ipc_messages.recv() => {
                    self.handle_ipc_message(msg).await;
                }
            }
        }

        info!("Shutting down galleyd");

        self.ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    fn broadcast(&self, events: Vec<Event>) {
        for event in events {
            self.ipc.broadcast_event(event);
        }
    }

    async fn handle_ipc_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                if !self.rate_limiter.check(&client_id) {
                    let response = Response::error(
                        request.request_id,
                        ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                    );
                    let _ = self.ipc.send_response(&client_id, response).await;
                    return;
                }

                let Some(info) = self.ipc.get_client_info(&client_id).await else {
                    debug!(client_id = %client_id, "Request from departed client dropped");
                    return;
                };

                // Backend calls can be slow; keep the tick loop moving
                let kitchen = self.kitchen.clone();
                let ipc = self.ipc.clone();
                tokio::spawn(async move {
                    let handled = kitchen.handle_request(&info, request).await;
                    let _ = ipc.send_response(&client_id, handled.response).await;
                    for event in handled.events {
                        ipc.broadcast_event(event);
                    }
                });
            }

            ServerMessage::ClientConnected { client_id, info } => {
                info!(
                    client_id = %client_id,
                    role = ?info.role,
                    uid = ?info.uid,
                    "Client connected"
                );

                self.kitchen.client_connected(&client_id).await;

                let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ClientConnected {
                    client_id: client_id.to_string(),
                    role: format!("{:?}", info.role),
                    uid: info.uid,
                }));
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                self.kitchen.client_disconnected(&client_id).await;

                let _ = self.store.append_audit(AuditEvent::new(
                    AuditEventType::ClientDisconnected {
                        client_id: client_id.to_string(),
                    },
                ));

                self.rate_limiter.remove(&client_id);
            }
        }
    }
}

/// Next periodic sync, or never when sync is disabled
async fn next_sync(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "galleyd starting");

    if galley_util::is_mock_time_active() {
        warn!("Mock time is active, timers follow GALLEY_MOCK_TIME");
    }

    let service = Service::new(&args).await?;
    service.run().await
}
