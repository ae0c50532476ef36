//! Configuration management for restline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RestError, Result};

/// Environment variable prefix for [`RestConfig::load`] overrides,
/// e.g. `RESTLINE__DISPATCHER__GLOBAL_LIMIT=40`.
pub const ENV_PREFIX: &str = "RESTLINE";

/// Main configuration for a REST session.
#[derive(Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// Bot token sent as `Authorization: Bot <token>`
    #[serde(default)]
    pub token: Option<String>,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Dispatcher and retry configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            token: None,
            user_agent: default_user_agent(),
            dispatcher: DispatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user_agent", &self.user_agent)
            .field("dispatcher", &self.dispatcher)
            .field("logging", &self.logging)
            .finish()
    }
}

fn default_user_agent() -> String {
    format!("restline/{}", env!("CARGO_PKG_VERSION"))
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Requests allowed across all buckets per global interval
    #[serde(default = "default_global_limit")]
    pub global_limit: u32,

    /// Global ceiling refill interval in milliseconds
    #[serde(default = "default_global_interval")]
    pub global_interval_ms: u64,

    /// Retries after 5xx responses or transport failures
    #[serde(default = "default_max_server_retries")]
    pub max_server_retries: u32,

    /// Rate-limit cooldowns tolerated per request before giving up
    #[serde(default = "default_max_throttle_retries")]
    pub max_throttle_retries: u32,

    /// First server-error backoff delay in milliseconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Largest server-error backoff delay in milliseconds
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Randomize server-error backoff delays
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: bool,

    /// Longest server-requested cooldown honoured, in milliseconds
    #[serde(default = "default_max_cooldown")]
    pub max_cooldown_ms: u64,

    /// Drop idle buckets after this many seconds; never when unset
    #[serde(default)]
    pub bucket_idle_eviction_secs: Option<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            global_limit: default_global_limit(),
            global_interval_ms: default_global_interval(),
            max_server_retries: default_max_server_retries(),
            max_throttle_retries: default_max_throttle_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            backoff_jitter: default_backoff_jitter(),
            max_cooldown_ms: default_max_cooldown(),
            bucket_idle_eviction_secs: None,
        }
    }
}

fn default_global_limit() -> u32 {
    50
}

fn default_global_interval() -> u64 {
    1000
}

fn default_max_server_retries() -> u32 {
    3
}

fn default_max_throttle_retries() -> u32 {
    10
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_backoff_jitter() -> bool {
    true
}

fn default_max_cooldown() -> u64 {
    600_000
}

impl DispatcherConfig {
    pub fn global_interval(&self) -> Duration {
        Duration::from_millis(self.global_interval_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }

    pub fn bucket_idle_eviction(&self) -> Option<Duration> {
        self.bucket_idle_eviction_secs.map(Duration::from_secs)
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.global_limit == 0 {
            return Err(RestError::Config("global_limit must be greater than zero".into()));
        }
        if self.global_interval_ms == 0 {
            return Err(RestError::Config(
                "global_interval_ms must be greater than zero".into(),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(RestError::Config(format!(
                "backoff_max_ms ({}) must be >= backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        if self.max_cooldown_ms == 0 {
            return Err(RestError::Config(
                "max_cooldown_ms must be greater than zero".into(),
            ));
        }
        if self.bucket_idle_eviction_secs == Some(0) {
            return Err(RestError::Config(
                "bucket_idle_eviction_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `restline=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RestConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RestConfig =
            serde_yaml::from_str(yaml).map_err(|e| RestError::Config(e.to_string()))?;
        config.dispatcher.validate()?;
        Ok(config)
    }

    /// Layer an optional YAML file with `RESTLINE__*` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`RestConfig::load`], reading `<prefix>__SECTION__KEY` variables.
    pub fn load_with_prefix(path: Option<&str>, prefix: &str) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::with_name(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config: RestConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RestError::Config(e.to_string()))?;
        config.dispatcher.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RestConfig::default();

        assert!(config.token.is_none());
        assert!(config.user_agent.starts_with("restline/"));
        assert_eq!(config.dispatcher.global_limit, 50);
        assert_eq!(config.dispatcher.global_interval(), Duration::from_secs(1));
        assert_eq!(config.dispatcher.max_server_retries, 3);
        assert_eq!(config.dispatcher.bucket_idle_eviction(), None);
        assert_eq!(config.dispatcher.max_cooldown(), Duration::from_secs(600));
        assert_eq!(config.logging.level, "info");
        assert!(config.dispatcher.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
token: secret
dispatcher:
  global_limit: 10
  max_server_retries: 2
  backoff_jitter: false
logging:
  json: true
"#;
        let config = RestConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.dispatcher.global_limit, 10);
        assert_eq!(config.dispatcher.max_server_retries, 2);
        assert!(!config.dispatcher.backoff_jitter);
        assert_eq!(config.dispatcher.global_interval_ms, 1000);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_debug_hides_token() {
        let config = RestConfig {
            token: Some("very-secret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);

        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_from_yaml_rejects_invalid_dispatcher() {
        let yaml = r#"
dispatcher:
  global_limit: 0
"#;
        assert!(matches!(RestConfig::from_yaml(yaml), Err(RestError::Config(_))));

        let yaml = r#"
dispatcher:
  backoff_base_ms: 1000
  backoff_max_ms: 10
"#;
        assert!(matches!(RestConfig::from_yaml(yaml), Err(RestError::Config(_))));

        let yaml = r#"
dispatcher:
  max_cooldown_ms: 0
"#;
        assert!(matches!(RestConfig::from_yaml(yaml), Err(RestError::Config(_))));
    }

    #[test]
    fn test_from_yaml_rejects_garbage() {
        assert!(matches!(
            RestConfig::from_yaml("dispatcher: [1, 2"),
            Err(RestError::Config(_))
        ));
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        assert!(matches!(
            RestConfig::from_file("/definitely/not/here.yaml"),
            Err(RestError::Io(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("restline-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "user_agent: tests\ndispatcher:\n  global_limit: 7\n  bucket_idle_eviction_secs: 60\n",
        )
        .unwrap();

        let config = RestConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.user_agent, "tests");
        assert_eq!(config.dispatcher.global_limit, 7);
        assert_eq!(
            config.dispatcher.bucket_idle_eviction(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let prefix = "RESTLINE_OVERRIDE_TEST";
        std::env::set_var("RESTLINE_OVERRIDE_TEST__DISPATCHER__GLOBAL_LIMIT", "40");
        std::env::set_var("RESTLINE_OVERRIDE_TEST__LOGGING__JSON", "true");

        let bare = RestConfig::load_with_prefix(None, prefix);

        let path = std::env::temp_dir().join(format!("restline-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "user_agent: from-file\ndispatcher:\n  global_limit: 7\n  max_server_retries: 1\n",
        )
        .unwrap();
        let layered = RestConfig::load_with_prefix(path.to_str(), prefix);

        std::fs::remove_file(&path).unwrap();
        std::env::remove_var("RESTLINE_OVERRIDE_TEST__DISPATCHER__GLOBAL_LIMIT");
        std::env::remove_var("RESTLINE_OVERRIDE_TEST__LOGGING__JSON");

        let bare = bare.unwrap();
        assert_eq!(bare.dispatcher.global_limit, 40);
        assert!(bare.logging.json);
        assert_eq!(bare.dispatcher.max_server_retries, 3);

        let layered = layered.unwrap();
        assert_eq!(layered.dispatcher.global_limit, 40);
        assert_eq!(layered.dispatcher.max_server_retries, 1);
        assert_eq!(layered.user_agent, "from-file");
    }

    #[test]
    fn test_load_reads_restline_prefix() {
        std::env::set_var("RESTLINE__LOGGING__LEVEL", "restline=trace");
        let loaded = RestConfig::load(None);
        std::env::remove_var("RESTLINE__LOGGING__LEVEL");

        assert_eq!(loaded.unwrap().logging.level, "restline=trace");
    }

    #[test]
    fn test_env_override_is_still_validated() {
        std::env::set_var("RESTLINE_INVALID_TEST__DISPATCHER__GLOBAL_LIMIT", "0");
        let loaded = RestConfig::load_with_prefix(None, "RESTLINE_INVALID_TEST");
        std::env::remove_var("RESTLINE_INVALID_TEST__DISPATCHER__GLOBAL_LIMIT");

        assert!(matches!(loaded, Err(RestError::Config(_))));
    }
}
