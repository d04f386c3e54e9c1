//! warmpoold — the warmpool daemon.
//!
//! Single binary that assembles the warmpool subsystems:
//! - Pool store (redb) and the pool-config registry
//! - Compute adapter, selected by `--provider`
//! - Instance checker (the reconciliation loop)
//! - REST API (axum)
//!
//! # Usage
//!
//! ```text
//! warmpoold --port 8080 --data-dir /var/lib/warmpool --provider fake
//! ```
//!
//! Every flag can also be set through its `WARMPOOL_*` environment
//! variable.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use warmpool_checker::{CheckerConfig, InstanceChecker};
use warmpool_compute::{ComputeAdapter, FakeCompute};
use warmpool_matcher::Matcher;
use warmpool_store::{PoolRegistry, PoolStore};

#[derive(Parser)]
#[command(name = "warmpoold", about = "warmpool daemon")]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "WARMPOOL_PORT", default_value = "8080")]
    port: u16,

    /// Data directory for the pool store.
    #[arg(long, env = "WARMPOOL_DATA_DIR", default_value = "/var/lib/warmpool")]
    data_dir: PathBuf,

    /// Compute provider to use. Only the in-memory `fake` provider ships
    /// in-tree; cloud providers plug in behind the same adapter trait.
    #[arg(long, env = "WARMPOOL_PROVIDER", default_value = "fake")]
    provider: String,

    /// Cloud region whose zones instances are spread across.
    #[arg(long, env = "WARMPOOL_REGION", default_value = "us-central1")]
    region: String,

    /// Seconds between pool reconciliation passes.
    #[arg(long, env = "WARMPOOL_POOL_CHECK_INTERVAL", default_value = "1")]
    pool_check_interval: u64,

    /// Error-budget window length in seconds.
    #[arg(long, env = "WARMPOOL_ERROR_INTERVAL", default_value = "60")]
    error_interval: u64,

    /// Consecutive failures tolerated inside one error window.
    #[arg(long, env = "WARMPOOL_MAX_ERROR_COUNT", default_value = "60")]
    max_error_count: u32,

    /// Allowed excess of warmed instances over tracked records before
    /// the sizing pass is skipped.
    #[arg(long, env = "WARMPOOL_ORPHAN_THRESHOLD", default_value = "0")]
    orphan_threshold: u64,

    /// Seconds to wait for a create operation before orphaning it.
    #[arg(long, env = "WARMPOOL_VM_CREATION_TIMEOUT", default_value = "90")]
    vm_creation_timeout: u64,

    /// Seconds between polls of an in-flight create operation.
    #[arg(long, env = "WARMPOOL_OPERATION_POLL_INTERVAL", default_value = "10")]
    operation_poll_interval: u64,

    /// Seconds the pool-config registry cache stays fresh.
    #[arg(long, env = "WARMPOOL_REGISTRY_TTL", default_value = "60")]
    registry_ttl: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,warmpoold=debug,warmpool=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    info!("warmpool daemon starting");

    // ── Pool store and registry ────────────────────────────────────

    std::fs::create_dir_all(&cli.data_dir)?;
    let db_path = cli.data_dir.join("warmpool.redb");
    let store = PoolStore::open(&db_path)?;
    info!(path = ?db_path, "pool store opened");

    let registry = PoolRegistry::new(store.clone(), Duration::from_secs(cli.registry_ttl));

    // ── Compute adapter ────────────────────────────────────────────

    let compute: Arc<dyn ComputeAdapter> = match cli.provider.as_str() {
        "fake" => Arc::new(FakeCompute::new(&cli.region)),
        other => bail!("unknown compute provider: {other}"),
    };
    info!(provider = %cli.provider, region = %cli.region, "compute adapter initialized");

    // ── Instance checker ───────────────────────────────────────────

    let checker_config = CheckerConfig {
        pool_check_interval: Duration::from_secs(cli.pool_check_interval),
        error_interval: Duration::from_secs(cli.error_interval),
        max_error_count: cli.max_error_count,
        orphan_threshold: cli.orphan_threshold,
        vm_creation_timeout: Duration::from_secs(cli.vm_creation_timeout),
        operation_poll_interval: Duration::from_secs(cli.operation_poll_interval),
    };
    let checker = InstanceChecker::new(
        store.clone(),
        registry.clone(),
        compute.clone(),
        checker_config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut checker_handle = tokio::spawn(async move { checker.run(shutdown_rx).await });

    // ── API server ─────────────────────────────────────────────────

    let matcher = Arc::new(Matcher::new(store, registry.clone(), compute));
    let router = warmpool_api::build_router(matcher, registry);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    tokio::select! {
        result = server => {
            result?;
            // Graceful shutdown: wait for the checker to drain.
            let _ = shutdown_tx.send(true);
            let _ = checker_handle.await;
        }
        _ = &mut checker_handle => {
            // Unless a shutdown is already in progress, the checker only
            // returns when the error budget is exhausted; a supervisor is
            // expected to restart us.
            if !*shutdown_tx.borrow() {
                error!("instance checker stopped, exiting");
                bail!("instance checker terminated after sustained failures");
            }
        }
    }

    info!("warmpool daemon stopped");
    Ok(())
}
