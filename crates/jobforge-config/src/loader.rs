//! Configuration loader with layered sources.

use crate::{AppConfig, ConfigValidator};
use config::{Config, ConfigError, Environment, File};
use jobforge_core::ForgeError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Environment variable prefix for overrides (`JOBFORGE__WORKER__CONCURRENCY=4`).
pub const ENV_PREFIX: &str = "JOBFORGE";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `{config_dir}/default.toml` - Default values
    /// 2. `{config_dir}/{environment}.toml` - Environment-specific overrides
    /// 3. `{config_dir}/local.toml` - Local overrides
    /// 4. Environment variables with `JOBFORGE__` prefix
    pub fn new(config_dir: impl Into<String>) -> Result<Self, ForgeError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, ForgeError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    ///
    /// Worker settings are read once at startup, so a reload only affects
    /// components constructed afterwards.
    pub async fn reload(&self) -> Result<(), ForgeError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    fn load_config(config_dir: &str) -> Result<AppConfig, ForgeError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var("JOBFORGE_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        info!(environment = %environment, config_dir = %config_dir, "Loading configuration");

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("worker.queues")
                .try_parsing(true),
        );

        let app_config: AppConfig = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(config_error_to_forge_error)?;

        ConfigValidator::validate(&app_config).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            ForgeError::Configuration(messages.join("; "))
        })?;

        Ok(app_config)
    }
}

fn config_error_to_forge_error(err: ConfigError) -> ForgeError {
    ForgeError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path().join("absent").to_string_lossy()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.redis.key_prefix, "jobforge");
    }

    #[tokio::test]
    async fn test_loads_default_toml() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.worker.concurrency = 6;
        config.worker.queues = vec!["reports".to_string()];
        config.worker.max_attempts = Some(3);
        fs::write(
            dir.path().join("default.toml"),
            toml::to_string(&config).unwrap(),
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        let loaded = loader.get().await;
        assert_eq!(loaded.worker.concurrency, 6);
        assert_eq!(loaded.worker.queues, vec!["reports".to_string()]);
        assert_eq!(loaded.worker.max_attempts, Some(3));
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[worker]\nheartbeat_interval_secs = 20\nheartbeat_timeout_secs = 10\n",
        )
        .unwrap();

        let err = ConfigLoader::new(dir.path().to_string_lossy()).err().unwrap();
        assert!(err.to_string().contains("Heartbeat timeout"));
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.toml");
        fs::write(&path, "[worker]\nconcurrency = 3\n").unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        assert_eq!(loader.get().await.worker.concurrency, 3);

        fs::write(&path, "[worker]\nconcurrency = 5\n").unwrap();
        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.worker.concurrency, 5);
    }
}
