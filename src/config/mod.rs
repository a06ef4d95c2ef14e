mod file_config;

pub use file_config::FileConfig;

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments subject to config-file resolution.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values where present.
    pub fn resolve(cli: CliConfig, file: Option<FileConfig>) -> Result<Self> {
        let file = file.unwrap_or_default();

        let logging_level = match file.logging_level {
            Some(raw) => match RequestsLoggingLevel::from_str(&raw, true) {
                Ok(level) => level,
                Err(_) => bail!("Invalid logging_level in config file: {}", raw),
            },
            None => cli.logging_level,
        };

        Ok(AppConfig {
            db_path: file.db_path.unwrap_or(cli.db_path),
            port: file.port.unwrap_or(cli.port),
            logging_level,
        })
    }
}
