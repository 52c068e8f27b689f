use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use vault_core::config::{StoreBackend, VaultConfig};
use vault_scheduler::JobConfigStore;

mod app;
mod http;
mod jobs;

#[derive(Debug, Parser)]
#[command(name = "vault-gateway", version, about = "Coordination gateway: job scheduler, locks and session tokens")]
struct Cli {
    /// Config file (falls back to $VAULT_CONFIG, then ~/.vault/vault.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override `gateway.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Override `gateway.bind`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vault_gateway=info,vault_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > VAULT_CONFIG env > ~/.vault/vault.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("VAULT_CONFIG").ok());
    let mut config = VaultConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        VaultConfig::default()
    });
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(bind) = cli.bind {
        config.gateway.bind = bind;
    }

    ensure_parent_dir(&config.database.path);
    if config.coordination.backend == StoreBackend::Sqlite {
        ensure_parent_dir(config.coordination_path());
    }

    let store = vault_store::open_store(&config)?;

    // job configuration lives in the main database
    info!(path = %config.database.path, "opening SQLite database");
    let db = rusqlite::Connection::open(&config.database.path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let job_configs = JobConfigStore::new(db)?;
    let seeded = job_configs.seed_from_config(&config.scheduler.jobs)?;
    jobs::ensure_builtin_jobs(&job_configs)?;
    info!(seeded, "job configuration ready");

    let state = Arc::new(app::AppState::new(config, store, job_configs)?);
    let router = app::build_router(Arc::clone(&state));

    // scheduler loop runs until the watch flips to true
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler_task = if state.config.scheduler.enabled {
        let scheduler = Arc::clone(&state.scheduler);
        Some(tokio::spawn(async move { scheduler.run(shutdown_rx).await }))
    } else {
        info!("scheduler disabled; jobs only run when triggered over HTTP");
        None
    };

    let addr: SocketAddr = format!("{}:{}", state.config.gateway.bind, state.config.gateway.port).parse()?;
    info!(
        instance = %state.instance,
        git_sha = env!("VAULT_GIT_SHA"),
        "vault gateway listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal scheduler to stop; in-flight jobs finish first
    let _ = shutdown_tx.send(true);
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            error!("scheduler task ended abnormally: {e}");
        }
    }
    state.account_locks.shutdown();
    info!("vault gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
