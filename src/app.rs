use crate::config::Config;
use crate::data::catalog::PgCatalog;
use crate::data::kv::StateStore;
use crate::data::models::AlbumRef;
use crate::data::sink::{HarvestStore, PgStore};
use crate::harvest::scheduler::Scheduler;
use crate::harvest::{Pipeline, PipelineSettings};
use crate::partner::{
    CredentialManager, CredentialOptions, CredentialStore, HarvestClient, RetryPolicy,
    WebCredentialSource,
};
use crate::utils::fmt_duration;
use anyhow::{Context, bail};
use sqlx::ConnectOptions;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Main application struct holding the long-lived components.
pub struct App {
    config: Config,
    db_pool: Option<PgPool>,
    credentials: Arc<CredentialManager>,
}

impl App {
    /// Build the credential manager and, when `with_database` is set, connect and migrate.
    pub async fn new(config: Config, with_database: bool) -> Result<Self, anyhow::Error> {
        let credentials = Arc::new(Self::credential_manager(&config)?);

        let db_pool = if with_database {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set")?;
            Some(Self::connect_database(url).await?)
        } else {
            None
        };

        Ok(App {
            config,
            db_pool,
            credentials,
        })
    }

    fn credential_manager(config: &Config) -> Result<CredentialManager, anyhow::Error> {
        let seeds = config.seed_urls();
        if seeds.is_empty() {
            bail!("SEED_URLS must list at least one page");
        }
        for seed in &seeds {
            url::Url::parse(seed).with_context(|| format!("Invalid seed URL '{seed}'"))?;
        }
        url::Url::parse(&config.client_token_url).context("Invalid CLIENT_TOKEN_URL")?;

        let source = WebCredentialSource::new(
            config.client_token_url.clone(),
            config.app_version.clone(),
            config.client_id.clone(),
        )?;

        Ok(CredentialManager::new(
            Arc::new(source),
            CredentialStore::new(config.credential_cache_path.clone()),
            CredentialOptions {
                seeds,
                margin: config.credential_margin,
                retry: RetryPolicy::default(),
            },
        ))
    }

    async fn connect_database(url: &str) -> Result<PgPool, anyhow::Error> {
        let connect_options = PgConnectOptions::from_str(url)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(8)
            .acquire_slow_threshold(Duration::from_millis(500))
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(max_connections = 8, acquire_timeout = "4s", "database pool established");

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed successfully");

        Ok(db_pool)
    }

    fn pipeline(&self, pool: &PgPool, store: Arc<PgStore>) -> Result<Pipeline, anyhow::Error> {
        let harvester = HarvestClient::new(
            self.credentials.clone(),
            self.config.partner_api_url.clone(),
            self.config.app_version.clone(),
            RetryPolicy::default(),
        )?;
        let store: Arc<dyn HarvestStore> = store;

        Ok(Pipeline::new(
            Arc::new(PgCatalog::new(pool.clone())),
            Arc::new(harvester),
            store,
            PipelineSettings::from_config(&self.config),
        ))
    }

    /// Run workers and the scheduler until a shutdown signal arrives.
    pub async fn run(self) -> ExitCode {
        let Some(pool) = self.db_pool.clone() else {
            error!("The run command requires a database");
            return ExitCode::FAILURE;
        };
        let pipeline = match self.pipeline(&pool, Arc::new(PgStore::new(pool.clone()))) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(error = ?e, "Failed to build harvest pipeline");
                return ExitCode::FAILURE;
            }
        };

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handles = pipeline.spawn_workers(self.config.worker_count, &shutdown_tx);

        let scheduler = Scheduler::new(
            pipeline.coordinator().clone(),
            Some(StateStore::new(pool)),
            self.config.cycle_interval,
        );
        let scheduler_rx = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { scheduler.run(scheduler_rx).await }));

        info!(
            workers = self.config.worker_count,
            tasks_per_worker = self.config.tasks_per_worker,
            rate_per_minute = self.config.harvest_rate_per_minute,
            cycle_interval = fmt_duration(self.config.cycle_interval),
            cycle_mode = ?self.config.cycle_mode,
            "Harvester running"
        );

        shutdown_signal().await;
        info!(pending_tasks = pipeline.queue().pending(), "Shutdown requested");

        stop_all(shutdown_tx, handles, self.config.shutdown_timeout).await
    }

    /// Harvest the given albums once and wait for them to finish.
    pub async fn harvest(self, album_ids: Vec<String>) -> ExitCode {
        let Some(pool) = self.db_pool.clone() else {
            error!("The harvest command requires a database");
            return ExitCode::FAILURE;
        };
        let store = Arc::new(PgStore::new(pool.clone()));
        let pipeline = match self.pipeline(&pool, store.clone()) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(error = ?e, "Failed to build harvest pipeline");
                return ExitCode::FAILURE;
            }
        };

        let (shutdown_tx, _) = broadcast::channel(1);
        let handles = pipeline.spawn_workers(self.config.worker_count, &shutdown_tx);
        let cycle = pipeline.enqueue_albums(album_ids.into_iter().map(AlbumRef::bare));
        info!(cycle_id = %cycle.id, albums = cycle.albums_dispatched(), "One-shot harvest queued");

        let interrupted = tokio::select! {
            _ = pipeline.wait_idle() => false,
            _ = shutdown_signal() => true,
        };

        let stopped = stop_all(shutdown_tx, handles, self.config.shutdown_timeout).await;
        if interrupted {
            warn!("One-shot harvest interrupted");
            return ExitCode::FAILURE;
        }

        match store.cycle_summary(cycle.id).await {
            Ok(summary) => {
                for (status, count) in &summary {
                    println!("{status}: {count}");
                }
                let failed = summary.iter().any(|(status, _)| status != "success");
                if failed { ExitCode::FAILURE } else { stopped }
            }
            Err(e) => {
                error!(error = ?e, "Failed to read harvest results");
                ExitCode::FAILURE
            }
        }
    }

    /// Force a refresh and print the expiry of each credential.
    pub async fn refresh_credentials(self) -> ExitCode {
        match self.credentials.force_refresh().await {
            Ok(pair) => {
                println!("bearer expires at {}", pair.bearer.expires_at.to_rfc3339());
                println!(
                    "client expires at {} (refresh after {})",
                    pair.client.expires_at.to_rfc3339(),
                    pair.client.refresh_after.to_rfc3339()
                );
                println!(
                    "cached in {}",
                    self.credentials.store().cache_path().display()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "Credential refresh failed");
                ExitCode::FAILURE
            }
        }
    }
}

/// Broadcast shutdown and wait up to `timeout` for every task to exit.
async fn stop_all(
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    timeout: Duration,
) -> ExitCode {
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
        Ok(results) => {
            let panicked = results.iter().filter(|r| r.is_err()).count();
            if panicked > 0 {
                error!(panicked, "Tasks panicked during shutdown");
                return ExitCode::FAILURE;
            }
            info!("All tasks stopped");
            ExitCode::SUCCESS
        }
        Err(_) => {
            warn!(timeout = fmt_duration(timeout), "Tasks did not stop in time, exiting anyway");
            ExitCode::FAILURE
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
