//! CLI configuration and logging setup.

use anyhow::{Context, Result};
use config::{Config, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_FORMAT: &str = "pretty";
const DEFAULT_CONFIG_PATH: &str = "config/relaymeter.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    pub log_level: String,
    pub log_format: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("relaymeter"))
        .unwrap_or_else(|| PathBuf::from(".relaymeter"))
}

impl CliConfig {
    /// Defaults, then the config file, then `RELAYMETER_*` variables, then
    /// command-line overrides.
    pub fn load(
        config_path: Option<&Path>,
        data_dir: Option<&Path>,
        log_level: Option<&str>,
    ) -> Result<Self> {
        let resolved_path = match config_path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!(
                        "Configuration file {} not found (specified via --config)",
                        path.display()
                    );
                }
                Some(path.to_path_buf())
            }
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                path.exists().then_some(path)
            }
        };

        let mut builder = Config::builder()
            .set_default("data_dir", default_data_dir().display().to_string())?
            .set_default("log_level", DEFAULT_LOG_LEVEL)?
            .set_default("log_format", DEFAULT_LOG_FORMAT)?;

        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }

        builder = builder
            .add_source(Environment::with_prefix("RELAYMETER"))
            .set_override_option("data_dir", data_dir.map(|p| p.display().to_string()))?
            .set_override_option("log_level", log_level.map(str::to_string))?;

        builder
            .build()?
            .try_deserialize()
            .context("invalid relaymeter configuration")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn plans_path(&self) -> PathBuf {
        self.data_dir.join("plans.json")
    }
}

pub fn init_logging(config: &CliConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
