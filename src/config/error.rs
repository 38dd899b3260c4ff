//! Configuration Errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while locating, resolving or using the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found in any of: {}", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid '{section}' section: {source}")]
    Section {
        section: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("ignoring {key}={value:?}: {reason}")]
    EnvOverride {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to open log file {}: {source}", .path.display())]
    LogFileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),
}

impl ConfigError {
    /// Whether this error aborts a resolution pass
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::EnvOverride { .. } | Self::LogFileOpen { .. })
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_every_directory() {
        let err = ConfigError::NotFound {
            searched: vec![PathBuf::from("/etc/app"), PathBuf::from(".")],
        };
        assert_eq!(
            err.to_string(),
            "config file not found in any of: /etc/app, ."
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_env_override_is_not_fatal() {
        let err = ConfigError::EnvOverride {
            key: "LOG_LEVEL",
            value: "notanumber".to_string(),
            reason: "invalid digit found in string".to_string(),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().starts_with("ignoring LOG_LEVEL=\"notanumber\""));
    }
}
