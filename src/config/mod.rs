//! Configuration Module
//!
//! Layered configuration: a YAML file, per-field environment overrides and
//! live reload when the file changes.

pub mod env;
pub mod error;
pub mod loader;
pub mod log_writers;
pub mod resolver;
pub mod types;

pub use env::{EnvSource, ProcessEnv};
pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ConfigSource, CONFIG_NAME, DEFAULT_SEARCH_PATHS};
pub use log_writers::{LogWriter, LogWritersError};
pub use resolver::{ConfigResolver, ReloadEvent, ReloadPolicy, ResolverBuilder};
pub use types::*;
