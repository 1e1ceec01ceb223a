#![allow(clippy::cognitive_complexity)]
use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};

mod config;
mod startup_health;

use booking_lock::{LeaseManager, LeaseSettings, LeaseStore, MemoryStore, SystemClock, metrics};
use config::{
    cli::{self, Parser},
    trace,
};
use external_api::{ExternalApi, Health};
use lock_config::{Backend, LockConfig};
use nats_lease_store::{NatsClient, NatsLeaseStore};
use startup_health::verify_background_task_running;
use tokio::{
    runtime::Builder,
    signal,
    sync::mpsc,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::*;

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;
use tokio_util::sync::CancellationToken;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// how often the NATS connection state is polled for health reporting
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    // parses from cli or environment var
    if let Err(err) = dotenv::dotenv() {
        eprintln!(".env file not loaded: {err}");
    }
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.lock_log, &config.log_format)?;
    debug!(?config, ?trace_config);

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    // if we have a configured value here, set it
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    // build the runtime
    let rt = builder.build()?;

    rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => error!(?err, "failed to start server"),
            Ok(Err(err)) => error!(?err, "exited with error"),
            Ok(_) => debug!("exiting..."),
        }
    });

    Ok(())
}

async fn start(config: cli::Config) -> Result<()> {
    info!(instance_id = %config.instance_id, "using id");

    debug!("parsing lock config");
    let lock_cfg = LockConfig::parse(&config.config_path)?;
    info!(
        lease_duration = ?lock_cfg.lease_duration(),
        cleanup_interval = ?lock_cfg.cleanup_interval(),
        store_timeout = ?lock_cfg.store_timeout(),
        "lock config loaded"
    );

    match lock_cfg.backend() {
        Backend::Memory => {
            warn!("starting with in-memory lease store, leases are not shared between instances");
            run(config, &lock_cfg, MemoryStore::new(), None).await
        }
        Backend::Nats(nats_cfg) => {
            info!(bucket = %nats_cfg.leases_bucket, "starting with NATS lease store");
            let nats_client = NatsClient::new(nats_cfg.clone());
            nats_client
                .connect()
                .await
                .map_err(|e| anyhow!("NATS connection failed: {e}"))?;
            let store = NatsLeaseStore::open(nats_client.clone())
                .await
                .map_err(|e| anyhow!("failed to open leases bucket: {e}"))?;
            let res = run(config, &lock_cfg, store, Some(nats_client.clone())).await;
            nats_client.disconnect().await;
            res
        }
    }
}

async fn run<S: LeaseStore>(
    config: cli::Config,
    lock_cfg: &LockConfig,
    store: S,
    nats_client: Option<NatsClient>,
) -> Result<()> {
    let settings = LeaseSettings {
        lease_duration: lock_cfg.lease_duration(),
        store_timeout: lock_cfg.store_timeout(),
    };
    let lease_mgr = Arc::new(LeaseManager::with_settings(
        store,
        settings,
        Arc::new(SystemClock),
    ));

    if config.sweep_once {
        let stats = lease_mgr
            .cleanup_expired_leases()
            .await
            .context("cleanup sweep failed")?;
        println!("{}", serde_json::to_string(&stats)?);
        return Ok(());
    }

    // start external api for healthchecks
    let api = ExternalApi::new(config.external_api, Arc::clone(&lease_mgr));
    let api_sender = api.sender();

    let token = CancellationToken::new();
    let mut api_task = api.start(token.clone());
    let mut cleanup_task = spawn_cleanup_task(
        Arc::clone(&lease_mgr),
        lock_cfg.cleanup_interval(),
        token.clone(),
    );
    let mut monitor_task = nats_client.clone().map(|client| {
        spawn_connection_monitor_task(
            client,
            api_sender.clone(),
            CONNECTION_POLL_INTERVAL,
            token.clone(),
        )
    });

    // Keep health BAD until all startup-critical tasks are confirmed running.
    if let Err(err) = startup_checks(
        &mut api_task,
        &mut cleanup_task,
        monitor_task.as_mut(),
        nats_client.as_ref(),
    )
    .await
    {
        let _ = api_sender.send(Health::Bad).await;
        token.cancel();
        return Err(err);
    }

    debug!("changing health to good after startup checks passed");
    api_sender
        .send(Health::Good)
        .await
        .context("error occurred in changing health status to Good")?;

    let result = tokio::select! {
        res = shutdown_signal(token.clone()) => res,
        res = &mut cleanup_task => Err(anyhow!("lease cleanup task exited unexpectedly: {res:?}")),
    };
    if result.is_err() {
        let _ = api_sender.send(Health::Bad).await;
    }
    token.cancel();

    if let Err(err) = api_task.await {
        error!(?err, "error waiting for web server API");
    }
    if !cleanup_task.is_finished() {
        if let Err(err) = cleanup_task.await {
            error!(?err, "error waiting for lease cleanup task");
        }
    }
    if let Some(monitor_task) = monitor_task {
        if let Err(err) = monitor_task.await {
            error!(?err, "error waiting for connection monitor task");
        }
    }
    result
}

async fn startup_checks(
    api_task: &mut JoinHandle<()>,
    cleanup_task: &mut JoinHandle<()>,
    monitor_task: Option<&mut JoinHandle<()>>,
    nats_client: Option<&NatsClient>,
) -> Result<()> {
    verify_background_task_running("external API", api_task).await?;
    verify_background_task_running("lease cleanup", cleanup_task).await?;
    if let Some(monitor_task) = monitor_task {
        verify_background_task_running("nats connection monitor", monitor_task).await?;
    }
    if let Some(nats_client) = nats_client {
        nats_client
            .startup_write_selftest()
            .await
            .map_err(|e| anyhow!("nats startup write selftest failed: {e}"))?;
    }
    Ok(())
}

fn spawn_cleanup_task<S: LeaseStore>(
    lease_mgr: Arc<LeaseManager<S>>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("lease cleanup task stopping");
                    return;
                }
                _ = ticker.tick() => {
                    match lease_mgr.cleanup_expired_leases().await {
                        Ok(stats) => {
                            if stats.cleaned_count > 0 {
                                info!(total_seen = stats.total_seen, cleaned = stats.cleaned_count, "removed expired leases");
                            }
                        }
                        Err(err) => {
                            metrics::CLEANUP_ERRORS.inc();
                            warn!(?err, "lease cleanup sweep failed");
                        }
                    }
                }
            }
        }
    })
}

fn spawn_connection_monitor_task(
    nats_client: NatsClient,
    health: mpsc::Sender<Health>,
    poll_interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        let mut was_connected = true;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("connection monitor task stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let is_connected = nats_client.is_connected().await;
                    if is_connected == was_connected {
                        continue;
                    }
                    was_connected = is_connected;
                    if is_connected {
                        info!("NATS connection restored - lease store available");
                        let _ = health.send(Health::Good).await;
                    } else {
                        warn!("NATS connection lost - lease store unavailable");
                        let _ = health.send(Health::Bad).await;
                    }
                }
            }
        }
    })
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    tokio::select! {
        ret = signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            token.cancel();
            ret.map_err(|err| anyhow!(err))
        }
        _ = token.cancelled() => Ok(()),
    }
}
