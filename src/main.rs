use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crm_agent_gateway::config::{AppConfig, CliConfig, FileConfig};
use crm_agent_gateway::modules::build_registries;
use crm_agent_gateway::server::{build_state, run_server, RequestsLoggingLevel, ServerConfig};
use crm_agent_gateway::store::SqliteGatewayStore;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite gateway database file.
    #[clap(value_parser = parse_path)]
    pub gateway_db: PathBuf,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3010)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Optional TOML config file; values set there override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let app_config = AppConfig::resolve(
        CliConfig {
            db_path: cli_args.gateway_db,
            port: cli_args.port,
            logging_level: cli_args.logging_level,
        },
        file_config,
    )?;

    info!(
        "Opening SQLite gateway database at {:?}...",
        app_config.db_path
    );
    let store = Arc::new(SqliteGatewayStore::new(&app_config.db_path)?);
    store.seed_default_pipeline()?;

    let state = build_state(
        ServerConfig {
            requests_logging_level: app_config.logging_level,
            port: app_config.port,
        },
        store.clone(),
        store.clone(),
        store,
        build_registries(),
    );

    run_server(state).await
}
