use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::Utc;
use clap::{Parser, Subcommand};
use dicom_cleanup::{
    config::CleanupServiceConfig,
    db::{DbError, DbPool},
    deletion::{CleanupReconciler, DeletionScheduler},
    jobs,
    models::{DEFAULT_PARTITION_KEY, EntityScope, InstanceIdentifier, PartitionKey},
    observability,
    storage::{self, BlobKind},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "dicom-cleanup.toml";

#[derive(Parser, Debug)]
#[command(version, about = "DICOM deferred deletion and cleanup service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./dicom-cleanup.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cleanup worker until interrupted (default)
    Run,
    /// Run a single reconciliation pass and print its result as JSON
    Pass,
    /// Schedule a study, series or instance for deletion
    Schedule {
        #[command(flatten)]
        target: TargetArgs,
        /// Make the target eligible for cleanup on the next pass
        #[arg(long)]
        immediate: bool,
    },
    /// Restore a scheduled deletion that is still inside its grace period
    Restore {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// List parked pending deletions as JSON
    Parked {
        /// Maximum number of records to list
        #[arg(long, default_value = "100")]
        limit: u32,
    },
    /// Clear the retry count of a parked instance so it is cleaned up again
    Unpark {
        #[command(flatten)]
        target: TargetArgs,
        /// Content version of the parked record
        #[arg(long)]
        version: i64,
    },
    /// Run database migrations and exit
    Migrate,
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Data partition key
    #[arg(long, default_value_t = DEFAULT_PARTITION_KEY)]
    partition: i32,
    /// Study Instance UID
    #[arg(long)]
    study: String,
    /// Series Instance UID (narrows the target to one series)
    #[arg(long)]
    series: Option<String>,
    /// SOP Instance UID (narrows the target to one instance)
    #[arg(long, requires = "series")]
    instance: Option<String>,
}

impl TargetArgs {
    fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.partition)
    }

    fn scope(&self) -> EntityScope {
        match (&self.series, &self.instance) {
            (Some(series), Some(instance)) => EntityScope::instance(&self.study, series, instance),
            (Some(series), None) => EntityScope::series(&self.study, series),
            _ => EntityScope::study(&self.study),
        }
    }

    fn identifier(&self) -> Result<InstanceIdentifier, String> {
        match (&self.series, &self.instance) {
            (Some(series), Some(instance)) => Ok(InstanceIdentifier::new(
                self.partition(),
                &self.study,
                series,
                instance,
            )),
            _ => Err("--series and --instance are required to address one instance".into()),
        }
    }
}

/// Stores and engine components built from configuration.
struct Services {
    db: DbPool,
    scheduler: DeletionScheduler,
    reconciler: Arc<CleanupReconciler>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        Some(Command::Pass) => run_pass(config_path).await,
        Some(Command::Schedule { target, immediate }) => {
            run_schedule(config_path, target, immediate).await
        }
        Some(Command::Restore { target }) => run_restore(config_path, target).await,
        Some(Command::Parked { limit }) => run_parked(config_path, limit).await,
        Some(Command::Unpark { target, version }) => {
            run_unpark(config_path, target, version).await
        }
        Some(Command::Migrate) => run_migrate(config_path).await,
        Some(Command::Run) | None => run_worker(config_path).await,
    }
}

fn exit_with_error(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

/// Resolve the config file to load, if any.
fn resolve_config_path(explicit_path: Option<&str>) -> Result<Option<PathBuf>, String> {
    if let Some(path) = explicit_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }
        return Ok(Some(path));
    }

    let cwd_config = PathBuf::from(DEFAULT_CONFIG_FILE);
    if cwd_config.exists() {
        return Ok(Some(cwd_config));
    }

    Ok(None)
}

/// Load configuration and initialize logging.
fn load_config(explicit_path: Option<&str>) -> CleanupServiceConfig {
    let path = resolve_config_path(explicit_path).unwrap_or_else(|e| exit_with_error(e));

    let config = match &path {
        Some(path) => CleanupServiceConfig::from_file(path).unwrap_or_else(|e| {
            exit_with_error(format!(
                "Failed to load config from {}: {}",
                path.display(),
                e
            ))
        }),
        None => CleanupServiceConfig::default(),
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        exit_with_error(format!("Failed to initialize tracing: {}", e));
    }

    match &path {
        Some(path) => tracing::info!(config_file = %path.display(), "Loaded configuration"),
        None => tracing::info!("No config file found, using built-in defaults"),
    }

    config
}

async fn build_services(config: &CleanupServiceConfig) -> Result<Services, String> {
    let db = DbPool::from_config(&config.database)
        .await
        .map_err(|e| format!("Failed to open index store: {}", e))?;

    if config.database.run_migrations() {
        db.run_migrations()
            .await
            .map_err(|e| format!("Database migrations failed: {}", e))?;
    }

    let files = storage::create_blob_store(&config.storage.files, BlobKind::File)
        .map_err(|e| format!("Failed to initialize file store: {}", e))?;
    let metadata = storage::create_blob_store(&config.storage.metadata, BlobKind::Metadata)
        .map_err(|e| format!("Failed to initialize metadata store: {}", e))?;

    let index = db.index_store();
    tracing::info!(
        index = index.backend_name(),
        files = files.backend_name(),
        metadata = metadata.backend_name(),
        "Stores initialized"
    );

    Ok(Services {
        scheduler: DeletionScheduler::new(index.clone(), config.cleanup.delete_delay()),
        reconciler: Arc::new(
            CleanupReconciler::new(index, metadata, files).with_dry_run(config.cleanup.dry_run),
        ),
        db,
    })
}

async fn services(config: &CleanupServiceConfig) -> Services {
    build_services(config)
        .await
        .unwrap_or_else(|e| exit_with_error(e))
}

/// Run the background worker until a shutdown signal arrives.
async fn run_worker(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        exit_with_error(format!("Failed to initialize metrics: {}", e));
    }

    let services = services(&config).await;
    let shutdown = CancellationToken::new();
    let task_tracker = TaskTracker::new();

    task_tracker.spawn(jobs::start_deletion_cleanup_worker(
        services.reconciler.clone(),
        config.cleanup.clone(),
        shutdown.clone(),
    ));
    task_tracker.close();

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, waiting for the cleanup worker to stop...");
            shutdown.cancel();
            if tokio::time::timeout(Duration::from_secs(30), task_tracker.wait())
                .await
                .is_err()
            {
                tracing::warn!("Timed out waiting for the cleanup worker to stop");
            }
        }
        _ = task_tracker.wait() => {
            tracing::info!("Cleanup worker exited");
        }
    }

    services.db.close().await;
}

/// Run one pass, cancelling it on Ctrl+C or SIGTERM.
async fn run_pass(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);
    let services = services(&config).await;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let result = services
        .reconciler
        .run_cleanup_pass(
            config.cleanup.batch_size,
            config.cleanup.max_retries,
            config.cleanup.retry_backoff(),
            &cancel,
        )
        .await;
    services.db.close().await;

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{}", json),
        Err(e) => exit_with_error(format!("Failed to serialize pass result: {}", e)),
    }
    if !result.success {
        std::process::exit(1);
    }
}

async fn run_schedule(explicit_config_path: Option<&str>, target: TargetArgs, immediate: bool) {
    let config = load_config(explicit_config_path);
    let services = services(&config).await;

    let delay = if immediate {
        Duration::ZERO
    } else {
        services.scheduler.delete_delay()
    };
    let result = services
        .scheduler
        .schedule_deletion(target.partition(), &target.scope(), delay)
        .await;
    services.db.close().await;

    match result {
        Ok(count) => println!("Scheduled {} instance(s) for deletion", count),
        Err(DbError::NotFound) => exit_with_error(format!("No live instances in {}", target.scope())),
        Err(e) => exit_with_error(format!("Failed to schedule deletion: {}", e)),
    }
}

async fn run_restore(explicit_config_path: Option<&str>, target: TargetArgs) {
    let config = load_config(explicit_config_path);
    let services = services(&config).await;

    let result = services
        .scheduler
        .restore_scheduled_deletion(target.partition(), &target.scope())
        .await;
    services.db.close().await;

    match result {
        Ok(count) => println!("Restored {} instance(s)", count),
        Err(DbError::NotFound) => exit_with_error(format!(
            "No restorable pending deletions in {}",
            target.scope()
        )),
        Err(e) => exit_with_error(format!("Failed to restore deletion: {}", e)),
    }
}

async fn run_parked(explicit_config_path: Option<&str>, limit: u32) {
    let config = load_config(explicit_config_path);
    let services = services(&config).await;

    let result = services
        .db
        .index_store()
        .list_parked(config.cleanup.max_retries, limit)
        .await;
    services.db.close().await;

    let parked = result.unwrap_or_else(|e| exit_with_error(format!("Failed to list parked records: {}", e)));
    match serde_json::to_string_pretty(&parked) {
        Ok(json) => println!("{}", json),
        Err(e) => exit_with_error(format!("Failed to serialize parked records: {}", e)),
    }
}

async fn run_unpark(explicit_config_path: Option<&str>, target: TargetArgs, version: i64) {
    let config = load_config(explicit_config_path);
    let identifier = target
        .identifier()
        .unwrap_or_else(|e| exit_with_error(e))
        .with_version(version);
    let services = services(&config).await;

    let result = services
        .db
        .index_store()
        .reset_retries(&identifier, Utc::now())
        .await;
    services.db.close().await;

    match result {
        Ok(()) => {
            tracing::info!(instance = %identifier, "Parked record reset by operator");
            println!("Unparked {}", identifier);
        }
        Err(DbError::NotFound) => {
            exit_with_error(format!("No pending deletion for {}", identifier))
        }
        Err(e) => exit_with_error(format!("Failed to unpark record: {}", e)),
    }
}

async fn run_migrate(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);

    if config.database.is_memory() {
        exit_with_error("Database is not configured. Nothing to migrate.");
    }

    let pool = DbPool::from_config(&config.database)
        .await
        .unwrap_or_else(|e| exit_with_error(format!("Failed to connect to database: {}", e)));

    match pool.run_migrations().await {
        Ok(()) => {
            tracing::info!("Database migrations completed successfully");
            pool.close().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            exit_with_error(format!("Database migrations failed: {}", e));
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// A handler that fails to install is logged and never resolves, so the
/// other signal still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_worker() {
        let args = Args::try_parse_from(["dicom-cleanup"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn test_schedule_series_scope() {
        let args = Args::try_parse_from([
            "dicom-cleanup",
            "schedule",
            "--study",
            "1.2",
            "--series",
            "1.2.3",
            "--immediate",
        ])
        .unwrap();
        let Some(Command::Schedule { target, immediate }) = args.command else {
            panic!("expected schedule command");
        };
        assert!(immediate);
        assert_eq!(target.partition(), PartitionKey::default());
        assert_eq!(target.scope(), EntityScope::series("1.2", "1.2.3"));
    }

    #[test]
    fn test_instance_requires_series() {
        let result = Args::try_parse_from([
            "dicom-cleanup",
            "schedule",
            "--study",
            "1.2",
            "--instance",
            "1.2.3.4",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unpark_needs_full_identifier() {
        let args = Args::try_parse_from([
            "dicom-cleanup",
            "unpark",
            "--study",
            "1.2",
            "--version",
            "7",
        ])
        .unwrap();
        let Some(Command::Unpark { target, .. }) = args.command else {
            panic!("expected unpark command");
        };
        assert!(target.identifier().is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let args =
            Args::try_parse_from(["dicom-cleanup", "parked", "--config", "/etc/cleanup.toml"])
                .unwrap();
        assert_eq!(args.config.as_deref(), Some("/etc/cleanup.toml"));
    }
}
