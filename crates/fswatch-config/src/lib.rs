//! Configuration and logging setup for the file event publisher.
//!
//! Configuration is a TOML document:
//!
//! ```toml
//! [publisher]
//! name = "fsevents"
//! flush_timeout_ms = 5000
//!
//! [[subscriptions]]
//! path = "/var/log"
//! recursive = true
//! mask = ["created", "removed"]
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Unknown keys are rejected so typos don't silently disable a subscription.

use std::path::{Path, PathBuf};
use std::sync::{Once, OnceLock};
use std::time::Duration;

use fswatch_events::flags::{self, EventFlags};
use fswatch_events::{SubscriptionContext, FSEVENTS_PUBLISHER_NAME};
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

/// Environment variable naming the config file used by [`discover_config_path`].
pub const FSWATCH_CONFIG_ENV_VAR: &str = "FSWATCH_CONFIG";

const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FswatchConfig {
    #[serde(default)]
    pub publisher: PublisherSettings,

    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherSettings {
    /// Registry name of the publisher to run.
    #[serde(default = "PublisherSettings::default_name")]
    pub name: String,

    /// How long a synchronous flush waits for the publisher thread.
    #[serde(default = "PublisherSettings::default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Overrides the raw queue capacity of the `notify` backend.
    #[serde(default)]
    pub raw_queue_capacity: Option<usize>,
}

impl PublisherSettings {
    fn default_name() -> String {
        FSEVENTS_PUBLISHER_NAME.to_owned()
    }

    fn default_flush_timeout_ms() -> u64 {
        DEFAULT_FLUSH_TIMEOUT_MS
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// A deterministic backend honouring the configured flush timeout.
    pub fn manual_backend(&self) -> fswatch_events::ManualBackend {
        fswatch_events::ManualBackend::with_flush_timeout(self.flush_timeout())
    }

    /// The `notify` backend, sized from this config or, failing that, the environment.
    #[cfg(feature = "watch-notify")]
    pub fn notify_backend(
        &self,
    ) -> Result<fswatch_events::NotifyBackend, fswatch_events::BackendError> {
        let backend = match self.raw_queue_capacity {
            Some(capacity) => fswatch_events::NotifyBackend::with_raw_queue_capacity(capacity),
            None => fswatch_events::NotifyBackend::new()?,
        };
        Ok(backend.with_flush_timeout(self.flush_timeout()))
    }
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            flush_timeout_ms: Self::default_flush_timeout_ms(),
            raw_queue_capacity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    pub path: PathBuf,

    #[serde(default)]
    pub recursive: bool,

    /// Flag names (e.g. `created`, `removed`). Empty matches every event.
    #[serde(default)]
    pub mask: Vec<String>,
}

impl SubscriptionConfig {
    pub fn mask_bits(&self) -> Result<EventFlags, ConfigError> {
        self.mask.iter().try_fold(flags::NONE, |bits, name| {
            flags::parse_flag_name(name)
                .map(|bit| bits | bit)
                .ok_or_else(|| ConfigError::UnknownFlag {
                    path: self.path.display().to_string(),
                    name: name.clone(),
                })
        })
    }

    pub fn to_context(&self) -> Result<SubscriptionContext, ConfigError> {
        Ok(SubscriptionContext::new(&self.path)
            .recursive(self.recursive)
            .with_mask(self.mask_bits()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Write logs to stderr. When disabled, events are filtered but discarded.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            "off" | "none" => "off".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level, with `RUST_LOG` merged in when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse toml config: {0}")]
    Toml(String),

    #[error("unknown event flag `{name}` in subscription for {path}")]
    UnknownFlag { path: String, name: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` quotes the offending source line; keep the message and location.
        let message = err.message().trim().to_owned();
        match err.span() {
            Some(span) => ConfigError::Toml(format!("{message} (at byte {})", span.start)),
            None => ConfigError::Toml(message),
        }
    }
}

impl FswatchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: FswatchConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(
            target = "fswatch.config",
            path = %path.display(),
            subscriptions = config.subscriptions.len(),
            "loaded config"
        );
        Ok(config)
    }

    /// Checks semantic constraints the TOML schema can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.publisher.name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "publisher.name must not be empty".to_owned(),
            ));
        }
        if self.publisher.flush_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "publisher.flush_timeout_ms must be greater than zero".to_owned(),
            ));
        }
        if self.publisher.raw_queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "publisher.raw_queue_capacity must be greater than zero".to_owned(),
            ));
        }
        for sub in &self.subscriptions {
            if !sub.path.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "subscription path {} must be absolute",
                    sub.path.display()
                )));
            }
            sub.mask_bits()?;
        }
        Ok(())
    }

    /// Subscription contexts in declaration order.
    pub fn subscription_contexts(&self) -> Result<Vec<SubscriptionContext>, ConfigError> {
        self.subscriptions
            .iter()
            .map(SubscriptionConfig::to_context)
            .collect()
    }
}

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

fn config_env_lock() -> &'static ReentrantMutex<()> {
    CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

/// Runs `f` while holding the config environment lock.
///
/// Tests that set [`FSWATCH_CONFIG_ENV_VAR`] use this to avoid racing [`discover_config_path`].
pub fn with_config_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = config_env_lock().lock();
    f()
}

/// The config path named by [`FSWATCH_CONFIG_ENV_VAR`], if set and non-empty.
pub fn discover_config_path() -> Option<PathBuf> {
    let _guard = config_env_lock().lock();
    let value = std::env::var_os(FSWATCH_CONFIG_ENV_VAR)?;
    if value.is_empty() {
        return None;
    }
    let path = PathBuf::from(value);
    Some(path.canonicalize().unwrap_or(path))
}

/// Loads the discovered config, or the default config when none is named.
pub fn discover() -> Result<(FswatchConfig, Option<PathBuf>), ConfigError> {
    match discover_config_path() {
        Some(path) => Ok((FswatchConfig::load_from_path(&path)?, Some(path))),
        None => Ok((FswatchConfig::default(), None)),
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global tracing subscriber. Only the first call in a process has any effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let make_writer = if !config.stderr {
            BoxMakeWriter::new(std::io::sink)
        } else if cfg!(debug_assertions) {
            // Keeps `cargo test` output capture working.
            BoxMakeWriter::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        };

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            tracing::debug!(
                target = "fswatch.config",
                level = %config.level,
                json = config.json,
                "tracing initialized"
            );
        }
    });
}
