//! Configuration management

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Root of the local log directory tree, walked recursively.
    pub directory: String,
    /// Candidate files must carry this extension.
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Number of files ingested concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_suffix() -> String {
    "log".to_string()
}

fn default_workers() -> usize {
    5
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrievalConfig {
    /// Base URL of the remote log server. Empty disables retrieval.
    #[serde(default)]
    pub base_url: String,
    /// Path of the newline-delimited file index, relative to base_url.
    #[serde(default = "default_index_path")]
    pub index_path: String,
}

fn default_index_path() -> String {
    "index.txt".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config.toml"))
            .add_source(config::Environment::with_prefix("LOGLINK").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.scan.directory.is_empty() {
            anyhow::bail!("Scan directory cannot be empty");
        }
        if self.scan.workers == 0 {
            anyhow::bail!("Invalid scan workers: 0 is not allowed");
        }
        if self.scan.suffix.is_empty() || self.scan.suffix.starts_with('.') {
            anyhow::bail!(
                "Invalid scan suffix '{}'. Use the bare extension, e.g. 'log'",
                self.scan.suffix
            );
        }

        if !self.retrieval.base_url.is_empty() && !self.retrieval.base_url.starts_with("http") {
            anyhow::bail!(
                "Invalid retrieval base_url '{}'. Must be an http(s) URL",
                self.retrieval.base_url
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid logging level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        Ok(())
    }

    pub fn retrieval_enabled(&self) -> bool {
        !self.retrieval.base_url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "loglink.db".to_string(),
            },
            scan: ScanConfig {
                directory: "logs".to_string(),
                suffix: default_suffix(),
                workers: default_workers(),
            },
            retrieval: RetrievalConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(valid_config().validate().is_ok());
        assert!(!valid_config().retrieval_enabled());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = valid_config();
        config.scan.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_dotted_suffix() {
        let mut config = valid_config();
        config.scan.suffix = ".log".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_http_retrieval_url() {
        let mut config = valid_config();
        config.retrieval.base_url = "ftp://logs.example.com".to_string();
        assert!(config.validate().is_err());
    }
}
