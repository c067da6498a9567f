//! Shared configuration and error types for the dispatch core.

pub mod config;
pub mod error;
pub mod file_config;

pub use config::{AppConfig, DispatchConfig, PoolConfig};
pub use error::ConfigError;
pub use file_config::{load_config, parse_config, FileConfig};
