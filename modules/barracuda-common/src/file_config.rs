use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::config::{AppConfig, DispatchConfig, PoolConfig};

/// TOML-backed configuration. Every key is optional; missing keys keep the
/// built-in defaults.
///
/// ```toml
/// [pool]
/// enabled = true
/// size = 50
/// checkout_timeout_ms = 60000
/// retry_interval_ms = 50
/// max_retries = 3
/// sweep_interval_ms = 600000
///
/// [dispatch]
/// max_poly_chain_depth = 15
/// max_dispatch_depth = 35
/// event_extension = ".event"
/// use_id_aliases = true
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub pool: FilePoolConfig,
    #[serde(default)]
    pub dispatch: FileDispatchConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePoolConfig {
    pub enabled: Option<bool>,
    pub size: Option<usize>,
    pub checkout_timeout_ms: Option<u64>,
    pub retry_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileDispatchConfig {
    pub max_poly_chain_depth: Option<usize>,
    pub max_dispatch_depth: Option<usize>,
    pub event_extension: Option<String>,
    pub use_id_aliases: Option<bool>,
}

impl FileConfig {
    /// Overlay the file's settings on top of the defaults.
    pub fn into_app_config(self) -> AppConfig {
        let pool_defaults = PoolConfig::default();
        let dispatch_defaults = DispatchConfig::default();
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);

        AppConfig {
            pool: PoolConfig {
                enabled: self.pool.enabled.unwrap_or(pool_defaults.enabled),
                size: self.pool.size.unwrap_or(pool_defaults.size),
                checkout_timeout: ms(self.pool.checkout_timeout_ms, pool_defaults.checkout_timeout),
                retry_interval: ms(self.pool.retry_interval_ms, pool_defaults.retry_interval),
                max_retries: self.pool.max_retries.unwrap_or(pool_defaults.max_retries),
                sweep_interval: ms(self.pool.sweep_interval_ms, pool_defaults.sweep_interval),
            },
            dispatch: DispatchConfig {
                max_poly_chain_depth: self
                    .dispatch
                    .max_poly_chain_depth
                    .unwrap_or(dispatch_defaults.max_poly_chain_depth),
                max_dispatch_depth: self
                    .dispatch
                    .max_dispatch_depth
                    .unwrap_or(dispatch_defaults.max_dispatch_depth),
                event_extension: self
                    .dispatch
                    .event_extension
                    .unwrap_or(dispatch_defaults.event_extension),
                use_id_aliases: self
                    .dispatch
                    .use_id_aliases
                    .unwrap_or(dispatch_defaults.use_id_aliases),
            },
        }
    }
}

/// Parse TOML text into a validated [`AppConfig`].
pub fn parse_config(content: &str) -> Result<AppConfig> {
    let file: FileConfig = toml::from_str(content).context("Failed to parse config as TOML")?;
    let config = file.into_app_config();
    config.validate()?;
    Ok(config)
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Failed to load config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = parse_config(
            r#"
            [pool]
            size = 2
            retry_interval_ms = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.pool.retry_interval, Duration::from_millis(5));
        assert_eq!(config.pool.max_retries, 3);
        assert_eq!(config.dispatch, DispatchConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_config("[pool]\nsize = 2\nmystery = 1\n").is_err());
    }

    #[test]
    fn invalid_extension_fails_validation() {
        assert!(parse_config("[dispatch]\nevent_extension = \"event\"\n").is_err());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\nmax_dispatch_depth = 7").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.dispatch.max_dispatch_depth, 7);
    }

    #[test]
    fn missing_file_mentions_path() {
        let err = load_config(Path::new("/nonexistent/barracuda.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/barracuda.toml"));
    }
}
