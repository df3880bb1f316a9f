use crate::bus::EventService;
use crate::dispatch::DispatchMode;
use crate::error::{EventBusError, EventBusErrorExt};
use crate::key::SubscriptionKey;
use config::{Config, Environment, File};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Declarative settings for an [`EventService`].
///
/// ```toml
/// default_cache_size = 10
/// time_threshold_ms = 250
/// dispatch = "confined"
///
/// [cache_sizes]
/// "orders.created" = 100
///
/// [pattern_cache_sizes]
/// "audit\\..*" = 1000
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventServiceConfig {
    pub default_cache_size: usize,
    /// Exact topic to cache size.
    pub cache_sizes: BTreeMap<String, usize>,
    /// Topic pattern to cache size.
    pub pattern_cache_sizes: BTreeMap<String, usize>,
    /// Per-invocation time budget; enables timing telemetry when set.
    pub time_threshold_ms: Option<u64>,
    pub dispatch: DispatchMode,
    /// Name of the confined dispatch thread.
    pub thread_name: Option<String>,
}

impl EventService {
    /// Builds a service from declarative settings.
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] or [`EventBusError::InvalidPattern`] for a
    /// bad cache key, [`EventBusError::Spawn`] if the confined dispatch thread
    /// cannot start.
    pub fn from_config(config: &EventServiceConfig) -> Result<Self, EventBusError> {
        let mut builder = Self::builder()
            .default_cache_size(config.default_cache_size)
            .time_threshold(config.time_threshold_ms.map(Duration::from_millis))
            .dispatch(config.dispatch);
        for (topic, size) in &config.cache_sizes {
            builder = builder.cache_size(topic.as_str(), *size);
        }
        for (pattern, size) in &config.pattern_cache_sizes {
            builder = builder.cache_size(SubscriptionKey::pattern(pattern)?, *size);
        }
        if let Some(name) = &config.thread_name {
            builder = builder.thread_name(name.as_str());
        }
        builder.build()
    }
}

/// Loads settings from a file layered with environment overrides.
///
/// The file defaults to `relay` (any extension the `config` crate knows).
/// Variables prefixed with `RELAY__` override file values; nested keys use a
/// double underscore, e.g. `RELAY__EVENTS__DEFAULT_CACHE_SIZE=5`.
///
/// # Errors
/// [`EventBusError::Config`] if the file is missing or does not deserialize into `T`.
///
/// # Example
/// ```rust
/// use relay_event_bus::{EventServiceConfig, load_config};
///
/// let cfg: EventServiceConfig = load_config(Some("config/local")).unwrap_or_default();
/// ```
pub fn load_config<T>(path: Option<impl AsRef<Path>>) -> Result<T, EventBusError>
where
    T: DeserializeOwned,
{
    let effective_path = path.map_or_else(|| PathBuf::from("relay"), |p| p.as_ref().to_path_buf());

    let builder = Config::builder()
        .add_source(File::from(effective_path.as_path()).required(true))
        .add_source(
            Environment::with_prefix("RELAY").separator("__").convert_case(config::Case::Snake),
        );

    info!("Loading config from {}", effective_path.display());

    let config = builder
        .build()
        .context("Failed to build config")?
        .try_deserialize::<T>()
        .context("Failed to deserialize config")?;

    Ok(config)
}
