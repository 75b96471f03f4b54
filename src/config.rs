use crate::constants;
use crate::error::{Result, TrackerError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub ingest: IngestConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("violations.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    pub request_timeout_seconds: u64,
    pub default_per_page: u32,
    pub max_per_page: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            static_dir: PathBuf::from("static"),
            request_timeout_seconds: 30,
            default_per_page: 50,
            max_per_page: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_prefix: String,
    /// Directive used when RUST_LOG is not set
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_prefix: "violations.log".to_string(),
            default_filter: "violations_tracker=info,tower_http=info,warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Resume from stored since-cursors instead of re-fetching everything
    pub incremental: bool,
    /// A `running` run older than this no longer blocks new runs
    pub lease_timeout_minutes: i64,
    /// Pages buffered between adapter tasks and the writer
    pub channel_capacity: usize,
    pub retry: RetryConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            incremental: true,
            lease_timeout_minutes: 30,
            channel_capacity: 16,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub seed: SeedSourceConfig,
    pub openfda: OpenFdaSourceConfig,
    pub epa_echo: EpaEchoSourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeedSourceConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for SeedSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(constants::SEED_DATA_PATH),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenFdaSourceConfig {
    pub enabled: bool,
    pub base_url: String,
    pub queries: Vec<String>,
    pub page_size: u32,
    pub max_per_query: u32,
    pub requests_per_min: u64,
    pub timeout_seconds: u64,
    pub run_timeout_seconds: Option<u64>,
}

impl Default for OpenFdaSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: constants::OPENFDA_URL.to_string(),
            queries: constants::OPENFDA_SEARCH_QUERIES
                .iter()
                .map(|q| q.to_string())
                .collect(),
            page_size: constants::OPENFDA_MAX_LIMIT,
            max_per_query: 500,
            requests_per_min: 120,
            timeout_seconds: 30,
            run_timeout_seconds: Some(600),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EpaEchoSourceConfig {
    pub enabled: bool,
    pub base_url: String,
    pub sic_codes: Vec<String>,
    pub max_per_sic: u32,
    pub page_size: u32,
    pub poll_attempts: u32,
    pub page_poll_attempts: u32,
    pub poll_interval_ms: u64,
    pub requests_per_min: u64,
    pub timeout_seconds: u64,
    pub run_timeout_seconds: Option<u64>,
}

impl Default for EpaEchoSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: constants::EPA_ECHO_BASE_URL.to_string(),
            sic_codes: constants::CAFO_SIC_CODES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_per_sic: 100,
            page_size: 100,
            poll_attempts: 12,
            page_poll_attempts: 6,
            poll_interval_ms: 5_000,
            requests_per_min: 30,
            timeout_seconds: 60,
            run_timeout_seconds: Some(90),
        }
    }
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let config_content = fs::read_to_string(path).map_err(|e| {
            TrackerError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DB_PATH`, `PORT` and `LOG_DIR` from the environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(port) = std::env::var("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| TrackerError::Config(format!("PORT '{}' is not a port number", port)))?;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.dir = PathBuf::from(dir);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.server.max_per_page == 0 {
            return Err(TrackerError::Config("server.max_per_page must be at least 1".into()));
        }
        if self.server.default_per_page == 0 || self.server.default_per_page > self.server.max_per_page {
            return Err(TrackerError::Config(format!(
                "server.default_per_page must be within 1..={}",
                self.server.max_per_page
            )));
        }
        if self.ingest.retry.max_attempts == 0 {
            return Err(TrackerError::Config("ingest.retry.max_attempts must be at least 1".into()));
        }
        if self.sources.openfda.page_size == 0 || self.sources.openfda.page_size > constants::OPENFDA_MAX_LIMIT {
            return Err(TrackerError::Config(format!(
                "sources.openfda.page_size must be within 1..={}",
                constants::OPENFDA_MAX_LIMIT
            )));
        }
        if self.sources.epa_echo.page_size == 0 {
            return Err(TrackerError::Config("sources.epa_echo.page_size must be at least 1".into()));
        }
        Ok(())
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.max_per_page, 200);
        assert_eq!(config.sources.epa_echo.sic_codes.len(), 5);
        assert_eq!(config.sources.openfda.queries.len(), 12);
        assert!(config.ingest.incremental);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [database]
            path = "/tmp/v.db"

            [sources.epa_echo]
            enabled = false
            max_per_sic = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/v.db"));
        assert!(!config.sources.epa_echo.enabled);
        assert_eq!(config.sources.epa_echo.max_per_sic, 20);
        assert_eq!(config.sources.epa_echo.poll_attempts, 12);
        assert!(config.sources.openfda.enabled);
    }

    #[test]
    fn rejects_out_of_range_paging() {
        let err = Config::from_toml("[server]\nmax_per_page = 10\ndefault_per_page = 50\n").unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));

        let err = Config::from_toml("[sources.openfda]\npage_size = 1000\n").unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
    }

    #[test]
    fn missing_file_is_default() {
        let config = Config::load(Path::new("/definitely/not/here/config.toml")).unwrap();
        assert_eq!(config.database.path, PathBuf::from("violations.db"));
    }
}
