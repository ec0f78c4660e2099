use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the relay server
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind")]
    pub bind: String,
    /// HTTP port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token guarding /admin routes. Unset leaves them open.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Default long-poll wait budget in seconds
    pub poll_wait_secs: u64,
    /// Upper bound for a caller-requested wait budget
    pub max_poll_wait_secs: u64,
    /// Re-check interval while a poll is held open
    pub poll_interval_ms: u64,
    /// Period of the timeout sweeper
    pub sweep_interval_secs: u64,
    /// Running commands older than this are failed with "timeout"
    pub command_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_wait_secs: 25,
            max_poll_wait_secs: 60,
            poll_interval_ms: 1000,
            sweep_interval_secs: 30,
            command_timeout_secs: 120,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Wait budget for a poll, honoring a caller-requested value up to the cap.
    pub fn wait_budget(&self, requested_secs: Option<u64>) -> Duration {
        let secs = requested_secs
            .unwrap_or(self.poll_wait_secs)
            .min(self.max_poll_wait_secs);
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Run the scheduled reconciliation loop
    pub enabled: bool,
    /// Seconds between scheduled passes
    pub interval_secs: u64,
    /// Size of the upstream fetch window, starting at local midnight
    pub window_days: i64,
    /// Fixed offset used to compute "local midnight"
    pub utc_offset_minutes: i32,
    /// Fold the expiry scan into every pass
    pub expire_on_sync: bool,
    /// Base delay for the retry backoff after a failed pass
    pub retry_base_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 1800,
            window_days: 30,
            utc_offset_minutes: 0,
            expire_on_sync: true,
            retry_base_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the scheduling service API
    pub base_url: String,
    /// Bearer token for the scheduling service
    #[serde(default)]
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.zoom.us/v2".to_string(),
            token: None,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinksConfig {
    /// Lifetime of an issued link token
    pub ttl_secs: u64,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self { ttl_secs: 600 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files; stdout only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let dispatch = DispatchConfig::default();
        let sync = SyncConfig::default();

        let builder = Config::builder()
            // Start with default values
            .set_default("server.bind", default_bind())?
            .set_default("server.port", default_port() as i64)?
            .set_default("database.url", "sqlite://meetrelay.db?mode=rwc")?
            .set_default("database.max_connections", default_max_connections() as i64)?
            .set_default("dispatch.poll_wait_secs", dispatch.poll_wait_secs as i64)?
            .set_default("dispatch.max_poll_wait_secs", dispatch.max_poll_wait_secs as i64)?
            .set_default("dispatch.poll_interval_ms", dispatch.poll_interval_ms as i64)?
            .set_default("dispatch.sweep_interval_secs", dispatch.sweep_interval_secs as i64)?
            .set_default("dispatch.command_timeout_secs", dispatch.command_timeout_secs as i64)?
            .set_default("sync.enabled", sync.enabled)?
            .set_default("sync.interval_secs", sync.interval_secs as i64)?
            .set_default("sync.window_days", sync.window_days)?
            .set_default("sync.utc_offset_minutes", sync.utc_offset_minutes as i64)?
            .set_default("sync.expire_on_sync", sync.expire_on_sync)?
            .set_default("sync.retry_base_secs", sync.retry_base_secs as i64)?
            .set_default("upstream.base_url", UpstreamConfig::default().base_url)?
            .set_default("upstream.timeout_secs", 15)?
            .set_default("links.ttl_secs", LinksConfig::default().ttl_secs as i64)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("MEETRELAY_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (MEETRELAY_SERVER__PORT, etc.)
            .add_source(
                Environment::with_prefix("MEETRELAY")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration suitable for tests and local experiments
    pub fn default_config(database_url: &str) -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1".to_string(),
                port: default_port(),
                admin_token: None,
            },
            database: DatabaseConfig {
                url: database_url.to_string(),
                max_connections: 1,
            },
            dispatch: DispatchConfig::default(),
            sync: SyncConfig::default(),
            upstream: UpstreamConfig::default(),
            links: LinksConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.trim().is_empty() {
            errors.push("database.url must be set".to_string());
        }

        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be positive".to_string());
        }

        if self.dispatch.poll_interval_ms == 0 {
            errors.push("dispatch.poll_interval_ms must be positive".to_string());
        }

        if self.dispatch.poll_wait_secs > self.dispatch.max_poll_wait_secs {
            errors.push("dispatch.poll_wait_secs exceeds dispatch.max_poll_wait_secs".to_string());
        }

        if self.dispatch.sweep_interval_secs == 0 {
            errors.push("dispatch.sweep_interval_secs must be positive".to_string());
        }

        if self.dispatch.command_timeout_secs <= self.dispatch.max_poll_wait_secs {
            errors.push(
                "dispatch.command_timeout_secs should exceed dispatch.max_poll_wait_secs"
                    .to_string(),
            );
        }

        if self.sync.interval_secs == 0 {
            errors.push("sync.interval_secs must be positive".to_string());
        }

        if self.sync.window_days <= 0 {
            errors.push("sync.window_days must be positive".to_string());
        }

        if self.sync.utc_offset_minutes.abs() >= 24 * 60 {
            errors.push("sync.utc_offset_minutes must be within one day".to_string());
        }

        if self.sync.enabled && url::Url::parse(&self.upstream.base_url).is_err() {
            errors.push(format!(
                "upstream.base_url is not a valid URL: {}",
                self.upstream.base_url
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration for the host agent process
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the relay server
    pub server_url: String,
    /// Shared secret presented on poll/report and required on the local surface
    #[serde(default)]
    pub api_key: Option<String>,
    /// Where a generated api_key is kept when none is configured
    pub key_file: String,
    /// Optional display name sent on registration
    #[serde(default)]
    pub name: Option<String>,
    /// Port of the local command surface
    pub listen_port: u16,
    /// Wait budget requested on each poll
    pub poll_wait_secs: u64,
    /// Pause before re-registering or re-polling after a failure
    pub retry_delay_secs: u64,
    /// Log what would be sent instead of driving the desktop
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AgentConfig {
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        Config::builder()
            .set_default("server_url", "http://127.0.0.1:8080")?
            .set_default(
                "key_file",
                config_dir.join("agent.key").to_string_lossy().into_owned(),
            )?
            .set_default("listen_port", 8765)?
            .set_default("poll_wait_secs", 25)?
            .set_default("retry_delay_secs", 5)?
            .set_default("logging.level", "info")?
            .add_source(File::from(config_dir.join("agent.toml")).required(false))
            .add_source(
                Environment::with_prefix("MEETRELAY_AGENT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_budget_is_capped() {
        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.wait_budget(None), Duration::from_secs(25));
        assert_eq!(dispatch.wait_budget(Some(2)), Duration::from_secs(2));
        assert_eq!(dispatch.wait_budget(Some(600)), Duration::from_secs(60));
    }

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default_config("sqlite::memory:");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agent_key_file_defaults_next_to_config() {
        let config = AgentConfig::load_from("no-such-config-dir").unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(
            Path::new(&config.key_file),
            Path::new("no-such-config-dir").join("agent.key")
        );
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = AppConfig::default_config("");
        config.sync.window_days = 0;
        config.dispatch.command_timeout_secs = 10;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
