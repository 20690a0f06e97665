/*!
 * Configuration management for icpflow.
 *
 * Settings are layered: built-in defaults, then an optional TOML file, then
 * `PREFIX__SECTION__KEY` environment variables.
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Vendor library location used by Syngistix installations
pub const DEFAULT_LIBRARY_PATH: &str =
    r"C:\Program Files (x86)\PerkinElmer\Syngistix-ICP\SyngistixRemoteControl";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Module identity
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Instrument connection configuration
    #[serde(default)]
    pub instrument: InstrumentConfig,

    /// Analysis completion wait configuration
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Module identity reported to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Module name
    #[serde(default = "default_module_name")]
    pub module_name: String,

    /// Human-readable description
    #[serde(default = "default_description")]
    pub description: String,

    /// Instrument model
    #[serde(default = "default_model")]
    pub model: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to include the event target in log lines
    #[serde(default = "default_log_target")]
    pub with_target: bool,
}

/// Instrument connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Address of the machine running the vendor control service
    #[serde(default = "default_address")]
    pub server_address: String,

    /// Address this module is reachable on
    #[serde(default = "default_address")]
    pub client_address: String,

    /// Session name announced to the vendor service
    #[serde(default = "default_module_name")]
    pub session_name: String,

    /// Installation directory of the vendor remote-control library
    #[serde(default = "default_library_path")]
    pub library_path: String,

    /// Time bound for a single vendor call in milliseconds (0 means no timeout)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Number of status messages retained by the session
    #[serde(default = "default_status_log_capacity")]
    pub status_log_capacity: usize,
}

/// Analysis completion wait configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Interval between analysis status queries while waiting
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on a completion wait in seconds (0 means no timeout)
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    /// Whether analysis actions wait for completion unless told otherwise
    #[serde(default = "default_wait_for_completion")]
    pub wait_for_completion: bool,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            module_name: default_module_name(),
            description: default_description(),
            model: default_model(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: default_log_target(),
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            server_address: default_address(),
            client_address: default_address(),
            session_name: default_module_name(),
            library_path: default_library_path(),
            command_timeout_ms: default_command_timeout_ms(),
            status_log_capacity: default_status_log_capacity(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            wait_timeout_secs: default_wait_timeout_secs(),
            wait_for_completion: default_wait_for_completion(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl InstrumentConfig {
    /// Bound for one vendor call, `None` when disabled
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }
}

impl AnalysisConfig {
    /// Interval between status queries during a completion wait
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Bound for a completion wait, `None` when disabled
    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_secs > 0).then(|| Duration::from_secs(self.wait_timeout_secs))
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_module_name() -> String {
    "pe_icp_module".to_string()
}

fn default_description() -> String {
    "Controls a PerkinElmer Syngistix ICP (such as the Avio 550 Max).".to_string()
}

fn default_model() -> String {
    "PerkinElmer Avio 550 Max".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_target() -> bool {
    true
}

fn default_address() -> String {
    "192.168.4.32".to_string()
}

fn default_library_path() -> String {
    DEFAULT_LIBRARY_PATH.to_string()
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

fn default_status_log_capacity() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_wait_timeout_secs() -> u64 {
    6 * 60 * 60
}

fn default_wait_for_completion() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2000
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        if let Some(config) = self.override_with {
            return Ok(config);
        }

        let default_config = Config::default();
        let mut config_builder = ConfigLib::builder().add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            if !Path::new(&config_file).exists() {
                return Err(Error::config(format!(
                    "Configuration file {} does not exist",
                    config_file
                )));
            }
            debug!("Loading configuration from {}", config_file);
            config_builder = config_builder.add_source(File::with_name(&config_file));
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.module_name, "pe_icp_module");
        assert_eq!(config.instrument.server_address, "192.168.4.32");
        assert_eq!(config.instrument.library_path, DEFAULT_LIBRARY_PATH);
        assert_eq!(config.analysis.poll_interval(), Duration::from_secs(1));
        assert!(config.analysis.wait_for_completion);
        assert_eq!(config.server.bind_address(), "0.0.0.0:2000");
    }

    #[test]
    fn test_zero_disables_timeouts() {
        let mut config = Config::default();
        config.analysis.wait_timeout_secs = 0;
        config.instrument.command_timeout_ms = 0;
        assert!(config.analysis.wait_timeout().is_none());
        assert!(config.instrument.command_timeout().is_none());
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("icpflow.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [instrument]
                server_address = "10.0.0.5"
                session_name = "bench-icp"
                status_log_capacity = 50

                [analysis]
                poll_interval_ms = 250
            "#,
            )?;
        }

        let config = ConfigBuilder::new().with_config_file(&file_path).build()?;

        assert_eq!(config.instrument.server_address, "10.0.0.5");
        assert_eq!(config.instrument.client_address, "192.168.4.32");
        assert_eq!(config.instrument.session_name, "bench-icp");
        assert_eq!(config.instrument.status_log_capacity, 50);
        assert_eq!(config.analysis.poll_interval(), Duration::from_millis(250));

        Ok(())
    }

    #[test]
    fn test_config_builder_missing_file_is_an_error() {
        let err = ConfigBuilder::new()
            .with_config_file("/nonexistent/icpflow.toml")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("/nonexistent/icpflow.toml"));
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("ICPFLOWTEST__INSTRUMENT__CLIENT_ADDRESS", "10.1.1.1");
        env::set_var("ICPFLOWTEST__SERVER__PORT", "2101");

        let config = ConfigBuilder::new()
            .with_environment_prefix("ICPFLOWTEST")
            .build()?;

        assert_eq!(config.instrument.client_address, "10.1.1.1");
        assert_eq!(config.server.port, 2101);

        env::remove_var("ICPFLOWTEST__INSTRUMENT__CLIENT_ADDRESS");
        env::remove_var("ICPFLOWTEST__SERVER__PORT");

        Ok(())
    }

    #[test]
    fn test_override_wins() -> Result<()> {
        let mut custom = Config::default();
        custom.server.port = 9000;
        let config = ConfigBuilder::new()
            .with_environment_prefix("ICPFLOWTEST_UNUSED")
            .override_with(custom.clone())
            .build()?;
        assert_eq!(config, custom);
        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        let shared2 = shared.clone();
        assert_eq!(shared2.get().general.module_name, "pe_icp_module");
    }
}
