//! Mail Bot Configuration Library
//!
//! Resolves the mail bot's configuration from a YAML file layered with
//! environment overrides, and keeps it current while the file changes.

pub mod config;
pub mod shutdown;

pub use config::{ConfigError, ConfigResolver, ReloadEvent, ReloadPolicy, Sections};
pub use shutdown::{ShutdownCoordinator, ShutdownReason};

/// Common error type for the binary and process-level helpers
pub type Result<T> = anyhow::Result<T>;
