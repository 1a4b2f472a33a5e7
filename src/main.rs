use clap::Parser;
use docker_broker::adapters::{
    start_api_server, CommandExec, DockerConnector, HeartbeatClient, MemoryStore, PostgresStore,
};
use docker_broker::broker::BrokerManager;
use docker_broker::cli::{Cli, Commands};
use docker_broker::config::{AgentConfig, AppConfig, LoggingConfig};
use docker_broker::error::{BrokerError, Result};
use docker_broker::persistence::BrokerStore;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command() {
        Commands::Serve => {
            let config = load_broker_config(&cli.config_dir)?;
            init_logging(&config.logging);
            run_broker(config).await?;
        }
        Commands::Migrate => {
            let config = load_broker_config(&cli.config_dir)?;
            init_logging(&config.logging);
            let url = config.database.url.as_deref().ok_or_else(|| {
                BrokerError::Validation("database.url is required for migrate".to_string())
            })?;
            let store = PostgresStore::new(url, config.database.max_connections).await?;
            store.migrate().await?;
            info!("database migrations applied");
        }
        Commands::Agent { config } => {
            let config = AgentConfig::load_from(&config)?;
            init_logging(&config.logging);
            config.validate().map_err(invalid_config)?;
            HeartbeatClient::new(&config)?.run(shutdown_signal()).await?;
        }
    }

    Ok(())
}

fn load_broker_config(dir: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(dir)?;
    config.validate().map_err(invalid_config)?;
    Ok(config)
}

fn invalid_config(errors: Vec<String>) -> BrokerError {
    BrokerError::Validation(format!("invalid configuration: {}", errors.join("; ")))
}

async fn run_broker(config: AppConfig) -> Result<()> {
    let store: Arc<dyn BrokerStore> = match config.database.url.as_deref() {
        Some(url) => {
            let store = PostgresStore::new(url, config.database.max_connections).await?;
            store.migrate().await?;
            info!("using postgres store");
            Arc::new(store)
        }
        None => {
            warn!("database.url not set, broker state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let connector = DockerConnector::new(store.clone(), config.runtime.client_settings());
    let manager = BrokerManager::new(
        store,
        Arc::new(connector),
        Arc::new(CommandExec::new()),
        config.runtime.provisioner_settings(),
        config.catalog.name.clone(),
    );

    let seeded = manager.seed_catalog(&config.catalog.images).await?;
    info!(
        catalog = %config.catalog.name,
        seeded,
        "broker ready"
    );

    start_api_server(Arc::new(manager), &config.server, shutdown_signal()).await
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info,docker_broker=debug,sqlx=warn"));

    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
