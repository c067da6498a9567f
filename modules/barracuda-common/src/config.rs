use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_POOL_SIZE: usize = 50;
pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_MAX_POLY_CHAIN_DEPTH: usize = 15;
pub const DEFAULT_MAX_DISPATCH_DEPTH: usize = 35;
pub const DEFAULT_EVENT_EXTENSION: &str = ".event";

/// Event pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// When false every event is freshly constructed and nothing is pooled.
    pub enabled: bool,
    /// Events kept per class (free + checked out).
    pub size: usize,
    /// Checkout age after which the reaper force-releases an event.
    pub checkout_timeout: Duration,
    /// Sleep between checkout attempts when a class is exhausted.
    pub retry_interval: Duration,
    /// Total checkout attempts before giving up with `NoAvailableEvents`.
    pub max_retries: u32,
    /// How often the reaper sweeps checked-out events.
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: DEFAULT_POOL_SIZE,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl PoolConfig {
    /// Upper bound on how long a single checkout may wait for capacity.
    pub fn max_checkout_wait(&self) -> Duration {
        self.retry_interval * self.max_retries.saturating_sub(1)
    }
}

/// Dispatch loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Cap on synthesized ancestors for one polymorphic event.
    pub max_poly_chain_depth: usize,
    /// Cap on events dispatched in one run; guards against recursive dispatch.
    pub max_dispatch_depth: usize,
    /// Suffix that marks a request path as an event (`Login.event`).
    pub event_extension: String,
    /// Use the short class name (after the last `.`) as an event id.
    pub use_id_aliases: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_poly_chain_depth: DEFAULT_MAX_POLY_CHAIN_DEPTH,
            max_dispatch_depth: DEFAULT_MAX_DISPATCH_DEPTH,
            event_extension: DEFAULT_EVENT_EXTENSION.to_string(),
            use_id_aliases: true,
        }
    }
}

/// Application configuration.
///
/// Loaded from `BARRACUDA_*` environment variables via [`AppConfig::from_env`]
/// or from a TOML file via [`crate::load_config`]. Anything unset keeps its default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub pool: PoolConfig,
    pub dispatch: DispatchConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `from_env` uses the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let pool = PoolConfig {
            enabled: parse_or(&lookup, "BARRACUDA_POOL_ENABLED", defaults.pool.enabled)?,
            size: parse_or(&lookup, "BARRACUDA_POOL_SIZE", defaults.pool.size)?,
            checkout_timeout: millis_or(
                &lookup,
                "BARRACUDA_POOL_TIMEOUT_MS",
                defaults.pool.checkout_timeout,
            )?,
            retry_interval: millis_or(
                &lookup,
                "BARRACUDA_POOL_RETRY_INTERVAL_MS",
                defaults.pool.retry_interval,
            )?,
            max_retries: parse_or(&lookup, "BARRACUDA_POOL_MAX_RETRIES", defaults.pool.max_retries)?,
            sweep_interval: millis_or(
                &lookup,
                "BARRACUDA_POOL_SWEEP_INTERVAL_MS",
                defaults.pool.sweep_interval,
            )?,
        };

        let dispatch = DispatchConfig {
            max_poly_chain_depth: parse_or(
                &lookup,
                "BARRACUDA_MAX_POLY_CHAIN_DEPTH",
                defaults.dispatch.max_poly_chain_depth,
            )?,
            max_dispatch_depth: parse_or(
                &lookup,
                "BARRACUDA_MAX_DISPATCH_DEPTH",
                defaults.dispatch.max_dispatch_depth,
            )?,
            event_extension: lookup("BARRACUDA_EVENT_EXTENSION")
                .unwrap_or(defaults.dispatch.event_extension),
            use_id_aliases: parse_or(
                &lookup,
                "BARRACUDA_USE_ID_ALIASES",
                defaults.dispatch.use_id_aliases,
            )?,
        };

        let config = Self { pool, dispatch };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pool or dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.enabled && self.pool.size == 0 {
            return Err(ConfigError::Invalid(
                "pool size must be at least 1 when pooling is enabled".into(),
            ));
        }
        if self.pool.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("pool sweep interval must be non-zero".into()));
        }
        if self.dispatch.max_dispatch_depth == 0 {
            return Err(ConfigError::Invalid("max dispatch depth must be at least 1".into()));
        }
        if self.dispatch.max_poly_chain_depth == 0 {
            return Err(ConfigError::Invalid(
                "max polymorphic chain depth must be at least 1".into(),
            ));
        }
        if !self.dispatch.event_extension.starts_with('.') {
            return Err(ConfigError::Invalid(format!(
                "event extension must start with '.', got {:?}",
                self.dispatch.event_extension
            )));
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            enabled = self.pool.enabled,
            size = self.pool.size,
            timeout_ms = self.pool.checkout_timeout.as_millis() as u64,
            retry_interval_ms = self.pool.retry_interval.as_millis() as u64,
            max_retries = self.pool.max_retries,
            sweep_interval_ms = self.pool.sweep_interval.as_millis() as u64,
            "  event pool"
        );
        tracing::info!(
            max_poly_chain_depth = self.dispatch.max_poly_chain_depth,
            max_dispatch_depth = self.dispatch.max_dispatch_depth,
            extension = self.dispatch.event_extension.as_str(),
            use_id_aliases = self.dispatch.use_id_aliases,
            "  dispatch"
        );
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn millis_or<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = default.as_millis() as u64;
    parse_or(lookup, key, default_ms).map(Duration::from_millis)
}
