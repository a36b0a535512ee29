//! Server binary: configuration bootstrap, resource wiring, and the
//! axum serve loop with an optional embedded analysis worker.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emvox_config::{
    AnalysisMode, Config, ConfigLoad, ConfigLoader,
    loader::db_url::{DatabaseUrlSource, resolve_effective_database_url_with_source},
};
use emvox_core::MIGRATOR;
use emvox_core::clients::{
    EmotionClient, EmotionHttpSettings, FixtureEmotionClient, FixtureTranscriptionClient,
    HttpEmotionClient, HttpTranscriptionClient, TranscriptionClient, TranscriptionHttpSettings,
};
use emvox_core::progress::ProgressTracker;
use emvox_core::realtime::SnapshotService;
use emvox_core::service::AnalysisTaskService;
use emvox_core::store::{
    PgSessionDirectory, PgTaskStore, SessionDirectory, TaskStore, connect,
};
use emvox_core::worker::{BackoffPolicy, Worker, WorkerSettings, derive_worker_id};

use emvox_server::infra::app_state::{AppState, WorkerHandle};
use emvox_server::routes;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "emvox-server")]
#[command(about = "Voice emotion analysis service with a PostgreSQL-backed task queue")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Path to the TOML configuration file
    #[arg(long, env = "EMVOX_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Serve HTTP only; leave task consumption to other processes
    #[arg(long, default_value_t = false)]
    no_worker: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Check database connectivity and exit
    Preflight,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        match command {
            Command::Db(DbCommand::Preflight) => {
                run_db_preflight(&cli.serve).await?;
                return Ok(());
            }
            Command::Db(DbCommand::Migrate) => {
                run_db_migrate(&cli.serve).await?;
                return Ok(());
            }
        }
    }

    run_server(cli.serve).await
}

async fn run_db_preflight(args: &ServeArgs) -> anyhow::Result<()> {
    let ConfigBootstrap { database_url, .. } = load_runtime_config(args)?;
    let pool = connect(&database_url)
        .await
        .context("failed to connect to PostgreSQL for preflight")?;
    PgTaskStore::new(pool)
        .ping()
        .await
        .context("database preflight failed")?;
    info!("Database preflight passed");
    Ok(())
}

async fn run_db_migrate(args: &ServeArgs) -> anyhow::Result<()> {
    let ConfigBootstrap { database_url, .. } = load_runtime_config(args)?;
    let pool = connect(&database_url)
        .await
        .context("failed to connect to PostgreSQL for migration")?;
    MIGRATOR
        .run(&pool)
        .await
        .context("database migration failed")?;
    info!("Database migrations applied successfully");
    Ok(())
}

struct ConfigBootstrap {
    config: Config,
    database_url: String,
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<ConfigBootstrap> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    apply_cli_overrides(&mut config, args);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                // Quieter defaults. Override via RUST_LOG.
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    if !warnings.is_empty() {
        for warning in &warnings.items {
            match &warning.hint {
                Some(hint) => {
                    warn!(message = %warning.message, hint = %hint, "configuration warning")
                }
                None => {
                    warn!(message = %warning.message, "configuration warning")
                }
            }
        }
    }

    let (database_url, url_source): (String, &str) =
        match resolve_effective_database_url_with_source(&config) {
            Some((url, DatabaseUrlSource::Config)) => (url, "config"),
            Some((url, DatabaseUrlSource::Env)) => (url, "PG env"),
            None => {
                error!(
                    "DATABASE_URL, PGDATABASE, or DATABASE_NAME must be provided for PostgreSQL connections"
                );
                return Err(anyhow::anyhow!(
                    "No PostgreSQL connection configuration found"
                ));
            }
        };

    if !(database_url.starts_with("postgres://") || database_url.starts_with("postgresql://")) {
        error!("Only PostgreSQL database URLs are supported");
        return Err(anyhow::anyhow!(
            "Invalid database URL: must start with postgres:// or postgresql://"
        ));
    }

    info!("Connecting to PostgreSQL via {}", url_source);

    config.database.primary_url = Some(database_url.clone());

    Ok(ConfigBootstrap {
        config,
        database_url,
    })
}

fn apply_cli_overrides(config: &mut Config, args: &ServeArgs) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }
    if args.no_worker {
        config.worker.enabled = false;
    }
}

struct ResourceBootstrap {
    state: AppState,
    worker: Option<Worker>,
}

async fn wire_app_resources(
    config: &Config,
    database_url: &str,
) -> anyhow::Result<ResourceBootstrap> {
    let pool = match connect(database_url).await {
        Ok(pool) => {
            info!("Successfully connected to PostgreSQL");
            pool
        }
        Err(connect_error) => {
            error!(error = %connect_error, "PostgreSQL connection failed");
            return Err(anyhow::anyhow!(
                "Database connection failed: {}",
                connect_error
            ));
        }
    };

    match MIGRATOR.run(&pool).await {
        Ok(()) => {
            info!("Database schema initialized successfully");
        }
        Err(e) => {
            error!("Failed to initialize database schema: {}", e);
            return Err(anyhow::anyhow!("Database migration failed: {}", e));
        }
    }

    let store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool.clone()));
    let sessions: Arc<dyn SessionDirectory> = Arc::new(PgSessionDirectory::new(pool));

    let (emotion, transcription) = build_clients(config)?;

    let progress = ProgressTracker::new();
    let tasks = AnalysisTaskService::new(Arc::clone(&store), config.worker.max_attempts);
    let snapshots = SnapshotService::new(
        Arc::clone(&store),
        progress.clone(),
        config.realtime.curve_limit,
    );

    let worker_id = derive_worker_id("emvox");
    let (worker, handle) = if config.worker.enabled {
        let worker = Worker::new(
            Arc::clone(&store),
            Arc::clone(&emotion),
            Arc::clone(&transcription),
            progress.clone(),
            worker_settings(config),
            worker_id.clone(),
        );
        let handle = WorkerHandle::running(worker_id, worker.status());
        (Some(worker), handle)
    } else {
        info!("analysis worker disabled for this process");
        (None, WorkerHandle::disabled(worker_id))
    };

    if config.emotion.enabled {
        // Ask the emotion service to pre-load its model while the
        // listener comes up. Failures only cost the first task a cold
        // start.
        let warm = Arc::clone(&emotion);
        tokio::spawn(async move {
            if !warm.warmup().await {
                warn!("emotion service warmup probe failed");
            }
        });
    }

    let state = AppState {
        store,
        sessions,
        tasks,
        snapshots,
        progress,
        worker: handle,
        push_interval_ms: config.realtime.push_interval_ms,
    };

    Ok(ResourceBootstrap { state, worker })
}

#[allow(clippy::type_complexity)]
fn build_clients(
    config: &Config,
) -> anyhow::Result<(Arc<dyn EmotionClient>, Arc<dyn TranscriptionClient>)> {
    match config.emotion.mode {
        AnalysisMode::Http => {
            let emotion = HttpEmotionClient::new(EmotionHttpSettings {
                base_url: config.emotion.base_url.clone(),
                segment_ms: config.emotion.segment_ms,
                overlap_ms: config.emotion.overlap_ms,
                connect_timeout_ms: config.emotion.connect_timeout_ms,
                read_timeout_ms: config.emotion.read_timeout_ms,
                health_timeout_ms: config.emotion.health_timeout_ms,
            })
            .context("failed to build the emotion HTTP client")?;
            let transcription = HttpTranscriptionClient::new(TranscriptionHttpSettings {
                base_url: config.transcription.base_url.clone(),
                connect_timeout_ms: config.transcription.connect_timeout_ms,
                read_timeout_ms: config.transcription.read_timeout_ms,
            })
            .context("failed to build the transcription HTTP client")?;
            info!(
                ser = %config.emotion.base_url,
                asr = %config.transcription.base_url,
                "using HTTP model clients"
            );
            Ok((Arc::new(emotion), Arc::new(transcription)))
        }
        AnalysisMode::Fixture => {
            info!("using fixture model clients");
            Ok((
                Arc::new(FixtureEmotionClient::new(config.emotion.segment_ms)),
                Arc::new(FixtureTranscriptionClient),
            ))
        }
    }
}

fn worker_settings(config: &Config) -> WorkerSettings {
    WorkerSettings {
        poll_interval_ms: config.worker.poll_interval_ms,
        batch_size: config.worker.batch_size,
        backoff: BackoffPolicy {
            base_seconds: config.worker.backoff_base_seconds,
            max_seconds: config.worker.backoff_max_seconds,
            timeout_floor_seconds: config.worker.timeout_backoff_floor_seconds,
        },
        // The probe only means something when a real SER service is wired.
        probe_health: config.emotion.enabled && config.emotion.mode == AnalysisMode::Http,
        health_cooldown_ms: config.emotion.probe_cooldown_ms,
    }
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let ConfigBootstrap {
        config,
        database_url,
    } = load_runtime_config(&args)?;

    let ResourceBootstrap { state, worker } = wire_app_resources(&config, &database_url).await?;

    let shutdown = CancellationToken::new();
    let worker_task = worker.map(|worker| tokio::spawn(worker.run(shutdown.clone())));

    let app = routes::create_app(state);

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(
        "Starting emvox analysis server on {}:{}",
        config.server.host, config.server.port
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(task) = worker_task {
        if let Err(err) = task.await {
            warn!(error = %err, "worker task did not shut down cleanly");
        }
    }

    info!("emvox analysis server stopped");
    Ok(())
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM and cancels the shared token so
/// the embedded worker stops claiming new tasks.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::{ServeArgs, apply_cli_overrides, worker_settings};

    use emvox_config::{AnalysisMode, Config};

    fn serve_args() -> ServeArgs {
        ServeArgs {
            port: None,
            host: None,
            config: None,
            no_worker: false,
        }
    }

    #[test]
    fn cli_flags_override_the_loaded_config() {
        let mut config = Config::default();
        let args = ServeArgs {
            port: Some(9999),
            host: Some("127.0.0.1".into()),
            no_worker: true,
            ..serve_args()
        };

        apply_cli_overrides(&mut config, &args);

        assert_eq!(config.bind_address(), "127.0.0.1:9999");
        assert!(!config.worker.enabled);
    }

    #[test]
    fn absent_flags_leave_the_config_untouched() {
        let mut config = Config::default();
        apply_cli_overrides(&mut config, &serve_args());

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert!(config.worker.enabled);
    }

    #[test]
    fn health_probe_follows_the_analysis_mode() {
        let mut config = Config::default();
        config.emotion.mode = AnalysisMode::Fixture;
        assert!(!worker_settings(&config).probe_health);

        config.emotion.mode = AnalysisMode::Http;
        assert!(worker_settings(&config).probe_health);

        config.emotion.enabled = false;
        assert!(!worker_settings(&config).probe_health);
    }

    #[test]
    fn backoff_policy_carries_the_configured_values() {
        let mut config = Config::default();
        config.worker.backoff_base_seconds = 3;
        config.worker.backoff_max_seconds = 120;
        config.worker.timeout_backoff_floor_seconds = 45;
        config.worker.poll_interval_ms = 250;
        config.worker.batch_size = 5;

        let settings = worker_settings(&config);
        assert_eq!(settings.poll_interval_ms, 250);
        assert_eq!(settings.batch_size, 5);
        assert_eq!(settings.backoff.base_seconds, 3);
        assert_eq!(settings.backoff.max_seconds, 120);
        assert_eq!(settings.backoff.timeout_floor_seconds, 45);
    }
}
