//! Application runtime support: layered configuration and structured
//! logging.

pub mod config;
pub mod logging;

pub use config::{
    default_logging_config, AppConfig, CliArgs, DatabaseConfig, LoggingConfig, SecurityConfig,
    Section, ServerConfig,
};
