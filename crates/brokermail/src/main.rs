use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use tokio_util::sync::CancellationToken;

use brokermail::config::load_config;
use brokermail::db::{default_database_path, Database};
use brokermail::store::{RecordStore, SqliteRecordStore};
use brokermail::{logging, BrokermailError, ConfigError, SyncOrchestrator, SyncScheduler};

const CONFIG_ENV_VAR: &str = "BROKERMAIL_CONFIG";

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
}

async fn run(config_path: PathBuf) -> Result<(), BrokermailError> {
    let config = load_config(&config_path)?;
    logging::init(config.log_format)?;
    info!(
        "Starting brokermail v{} for '{}'",
        env!("CARGO_PKG_VERSION"),
        config.user_id
    );

    let db_path = config
        .database_path
        .clone()
        .or_else(default_database_path)
        .ok_or_else(|| ConfigError::Validation {
            message: "database_path is not set and no home directory was found".to_string(),
        })?;
    let db = Database::open(&db_path)?;
    info!("Using database at {}", db_path.display());

    let records: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(db));
    let orchestrator = SyncOrchestrator::from_config(&config, records)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        signal.cancel();
    })
    .map_err(|e| BrokermailError::Signal(e.to_string()))?;

    SyncScheduler::new(orchestrator, config.sync.poll_interval())
        .run(shutdown)
        .await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let Some(path) = config_path() else {
        eprintln!("usage: brokermail <config.json>  (or set {})", CONFIG_ENV_VAR);
        return ExitCode::from(2);
    };

    match run(path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The subscriber may not be installed yet.
            error!("{}", e);
            eprintln!("brokermail: {}", e);
            ExitCode::FAILURE
        }
    }
}
