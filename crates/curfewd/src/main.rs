//! curfewd - The curfew background service
//!
//! This is the main entry point for the curfewd service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Core engine
//! - Foreground/selection feed (NDJSON on stdin)
//! - Remote partner backend (limits, grants, notifications)
//! - Corrective action on the device

mod refresh;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use curfew_api::{FeedMessage, GrantChange};
use curfew_config::{Policy, load_config};
use curfew_core::{CoreEngine, CoreEvent, LimitFetch};
use curfew_host_api::{DeviceHost, GrantSnapshot, OfflineRemote, RemoteBackend};
use curfew_host_linux::{CommandDevice, HttpRemote};
use curfew_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use curfew_util::{
    Clock, MonotonicInstant, PackageId, SystemClock, default_config_path, is_mock_time_active,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use refresh::LimitRefresh;

/// curfewd - Per-app daily usage limits with remote time grants
#[derive(Parser, Debug)]
#[command(name = "curfewd")]
#[command(about = "Per-app daily usage limits with remote time grants", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/curfew/config.toml)
    #[arg(short, long, env = "CURFEW_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set CURFEW_DATA_DIR env var)
    #[arg(short, long, env = "CURFEW_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Results of background work, re-entering the engine through the main loop
#[derive(Debug)]
enum Completion {
    LimitFetched { package: PackageId, fetch: LimitFetch },
    LimitRefreshDone,
    GrantChanges(Vec<GrantChange>),
    EnforcementRecheck { generation: u64 },
}

/// Main service state
struct Service {
    engine: CoreEngine,
    policy: Policy,
    config_path: PathBuf,
    store: Arc<dyn Store>,
    remote: Arc<dyn RemoteBackend>,
    device: Arc<dyn DeviceHost>,
    clock: Arc<dyn Clock>,
    completions: mpsc::UnboundedSender<Completion>,
    /// Re-check task of the running enforcement loop, by generation
    recheck: Option<(u64, JoinHandle<()>)>,
    limit_refresh: LimitRefresh,
}

impl Service {
    fn new(
        args: &Args,
        policy: Policy,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Result<Self> {
        info!(
            config_path = %args.config.display(),
            ignored_packages = policy.feed.ignored_packages.len(),
            remote = policy.remote.is_some(),
            "Configuration loaded"
        );

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        // Initialize store
        let db_path = data_dir.join("curfew.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        // Collaborators
        let remote: Arc<dyn RemoteBackend> = match &policy.remote {
            Some(remote) => {
                info!(base_url = %remote.base_url, "Using HTTP partner backend");
                Arc::new(
                    HttpRemote::new(&remote.base_url, remote.request_timeout)
                        .context("Failed to build HTTP partner backend")?,
                )
            }
            None => {
                warn!("No [remote] configured, running with default limits and no grants");
                Arc::new(OfflineRemote)
            }
        };

        let device: Arc<dyn DeviceHost> =
            Arc::new(CommandDevice::new(policy.host.corrective_command.clone()));

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let engine = CoreEngine::new(&policy, store.clone(), clock.now());

        Ok(Self {
            engine,
            policy,
            config_path: args.config.clone(),
            store,
            remote,
            device,
            clock,
            completions,
            recheck: None,
            limit_refresh: LimitRefresh::default(),
        })
    }

    fn now(&self) -> (DateTime<Local>, MonotonicInstant) {
        (self.clock.now(), self.clock.now_mono())
    }

    async fn run(mut self, mut completions: mpsc::UnboundedReceiver<Completion>) -> Result<()> {
        let poller = self
            .policy
            .remote
            .as_ref()
            .map(|remote| self.spawn_grant_poller(remote.grant_poll_interval));

        // Set up signal handlers
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;
        let mut sigusr1 =
            signal(SignalKind::user_defined1()).context("Failed to create SIGUSR1 handler")?;

        let mut tick_timer = tokio::time::interval(self.policy.engine.tick_interval);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut feed = BufReader::new(tokio::io::stdin()).lines();
        let mut feed_open = true;

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

                // Signal: SIGHUP - reload configuration
                _ = sighup.recv() => {
                    self.reload_config();
                    if tick_timer.period() != self.policy.engine.tick_interval {
                        tick_timer = tokio::time::interval(self.policy.engine.tick_interval);
                        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }

                // Signal: SIGUSR1 - dump engine state
                _ = sigusr1.recv() => {
                    let (now, now_mono) = self.now();
                    match serde_json::to_string(&self.engine.snapshot(now, now_mono)) {
                        Ok(json) => info!(
                            snapshot = %json,
                            store_healthy = self.store.is_healthy(),
                            device_healthy = self.device.is_healthy(),
                            "Engine state"
                        ),
                        Err(e) => warn!(error = %e, "Failed to serialize engine state"),
                    }
                }

                // Tick timer - accrue usage, reset, re-evaluate
                _ = tick_timer.tick() => {
                    let (now, now_mono) = self.now();
                    let events = self.engine.on_tick(now, now_mono);
                    self.dispatch(events);
                }

                // Platform feed
                line = feed.next_line(), if feed_open => match line {
                    Ok(Some(line)) => self.handle_feed_line(&line),
                    Ok(None) => {
                        warn!("Feed closed, no further foreground changes will be seen");
                        feed_open = false;
                    }
                    Err(e) => {
                        error!(error = %e, "Feed read failed");
                        feed_open = false;
                    }
                },

                // Background work completions
                Some(completion) = completions.recv() => {
                    self.handle_completion(completion);
                }
            }
        }

        // Graceful shutdown
        info!("Shutting down curfewd");

        if let Some(poller) = poller {
            poller.abort();
        }
        if let Some((_, handle)) = self.recheck.take() {
            handle.abort();
        }

        // Account the open session before exit
        let (now, now_mono) = self.now();
        let events = self.engine.on_foreground_change(None, now, now_mono);
        debug!(dropped_events = events.len(), "Closed open session");

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    fn handle_feed_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let message = match FeedMessage::parse_line(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring feed line");
                return;
            }
        };

        let (now, now_mono) = self.now();
        let events = match message {
            FeedMessage::Foreground { package } => {
                // System surfaces and our own UI count as "nothing tracked"
                let foreground = (!self.policy.feed.is_ignored(&package)).then_some(package);
                self.engine.on_foreground_change(foreground, now, now_mono)
            }
            FeedMessage::Selection { packages } => {
                self.engine.set_selection(packages, now, now_mono)
            }
        };

        self.dispatch(events);
    }

    fn handle_completion(&mut self, completion: Completion) {
        let (now, now_mono) = self.now();

        let events = match completion {
            Completion::LimitFetched { package, fetch } => {
                self.engine.apply_limit(&package, fetch, now, now_mono)
            }
            Completion::LimitRefreshDone => {
                if let Some(queued) = self.limit_refresh.finish() {
                    self.spawn_limit_fetch(queued);
                }
                Vec::new()
            }
            Completion::GrantChanges(changes) => changes
                .iter()
                .flat_map(|change| self.engine.on_grant_change(change, now, now_mono))
                .collect(),
            Completion::EnforcementRecheck { generation } => {
                self.engine.enforcement_recheck(generation, now, now_mono)
            }
        };

        self.dispatch(events);
    }

    fn dispatch(&mut self, events: Vec<CoreEvent>) {
        for event in events {
            self.handle_core_event(event);
        }
    }

    fn handle_core_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::CorrectiveAction { package } => {
                let device = self.device.clone();
                tokio::spawn(async move {
                    if let Err(e) = device.redirect_home(&package).await {
                        warn!(package = %package, error = %e, "Corrective action failed");
                    }
                });
            }

            CoreEvent::NotifyPartner(notice) => {
                let remote = self.remote.clone();
                tokio::spawn(async move {
                    if let Err(e) = remote.notify_partner(&notice).await {
                        warn!(package = %notice.package, error = %e, "Partner notification failed");
                    }
                });
            }

            CoreEvent::ClearGrant { package } => {
                let remote = self.remote.clone();
                tokio::spawn(async move {
                    if let Err(e) = remote.clear_grant(&package).await {
                        warn!(package = %package, error = %e, "Grant clear failed");
                    }
                });
            }

            CoreEvent::WalletPush { package, remaining } => {
                let remote = self.remote.clone();
                tokio::spawn(async move {
                    if let Err(e) = remote.push_wallet(&package, remaining).await {
                        warn!(package = %package, error = %e, "Wallet push failed");
                    }
                });
            }

            CoreEvent::RefreshLimits { packages } => self.refresh_limits(packages),

            CoreEvent::EnforcementStarted { package, generation } => {
                debug!(package = %package, generation, "Scheduling enforcement re-checks");
                self.start_rechecks(generation);
            }

            CoreEvent::EnforcementStopped {
                package,
                generation,
                reason,
            } => {
                info!(package = %package, generation, ?reason, "Enforcement stopped");
                if self
                    .recheck
                    .as_ref()
                    .is_some_and(|(current, _)| *current == generation)
                    && let Some((_, handle)) = self.recheck.take()
                {
                    handle.abort();
                }
            }

            CoreEvent::Warning { package, remaining } => {
                info!(
                    package = %package,
                    remaining = %curfew_util::format_duration(remaining),
                    "Daily limit almost used up"
                );
            }

            other => debug!(event = ?other, "Core event"),
        }
    }

    fn start_rechecks(&mut self, generation: u64) {
        if let Some((_, handle)) = self.recheck.take() {
            handle.abort();
        }

        let tx = self.completions.clone();
        let period = self.policy.enforcement.recheck_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately; the initial corrective
            // action has already been issued
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx
                    .send(Completion::EnforcementRecheck { generation })
                    .is_err()
                {
                    break;
                }
            }
        });

        self.recheck = Some((generation, handle));
    }

    fn refresh_limits(&mut self, packages: Vec<PackageId>) {
        match self.limit_refresh.request(packages) {
            Some(batch) => self.spawn_limit_fetch(batch),
            None => debug!(
                queued = self.limit_refresh.queued(),
                "Limit refresh already in flight"
            ),
        }
    }

    fn spawn_limit_fetch(&self, packages: Vec<PackageId>) {
        let remote = self.remote.clone();
        let tx = self.completions.clone();
        tokio::spawn(async move {
            for package in packages {
                let fetch = match remote.fetch_limit(&package).await {
                    Ok(Some(minutes)) => LimitFetch::Configured { minutes },
                    Ok(None) => LimitFetch::NotConfigured,
                    Err(e) => {
                        warn!(package = %package, error = %e, "Limit fetch failed");
                        LimitFetch::Failed
                    }
                };
                if tx.send(Completion::LimitFetched { package, fetch }).is_err() {
                    return;
                }
            }
            let _ = tx.send(Completion::LimitRefreshDone);
        });
    }

    fn spawn_grant_poller(&self, period: Duration) -> JoinHandle<()> {
        let remote = self.remote.clone();
        let tx = self.completions.clone();

        tokio::spawn(async move {
            let mut previous: Option<GrantSnapshot> = None;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let snapshot = match remote.fetch_grants().await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(error = %e, "Grant poll failed");
                        continue;
                    }
                };

                let changes = match &previous {
                    Some(previous) => previous.diff(&snapshot),
                    None => snapshot.baseline(),
                };
                previous = Some(snapshot);

                if !changes.is_empty() {
                    debug!(changes = changes.len(), "Grant changes observed");
                    if tx.send(Completion::GrantChanges(changes)).is_err() {
                        break;
                    }
                }
            }
        })
    }

    fn reload_config(&mut self) {
        info!(config_path = %self.config_path.display(), "Reloading configuration");

        let success = match load_config(&self.config_path) {
            Ok(policy) => {
                if policy.remote != self.policy.remote || policy.host != self.policy.host {
                    warn!("Changes to [remote] and [host] take effect on restart");
                }
                self.engine.reload_policy(&policy);
                self.policy.engine = policy.engine;
                self.policy.enforcement = policy.enforcement;
                self.policy.feed = policy.feed;
                true
            }
            Err(e) => {
                warn!(error = %e, "Config reload failed, keeping current policy");
                false
            }
        };

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ConfigReloaded { success }));
    }
}

/// Human-readable logs on stderr plus JSON lines in the configured log directory
fn init_logging(log_level: &str, log_dir: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
    let log_path = log_dir.join("curfewd.jsonl");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(fmt::layer().json().with_writer(Mutex::new(log_file)))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let policy = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    init_logging(&args.log_level, &policy.service.log_dir)?;

    info!(version = env!("CARGO_PKG_VERSION"), "curfewd starting");
    if is_mock_time_active() {
        warn!("Mock time is active, calendar days follow CURFEW_MOCK_TIME");
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let service = Service::new(&args, policy, tx)?;
    service.run(rx).await
}
