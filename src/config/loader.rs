//! Configuration Loader
//!
//! Locates the YAML document and runs one resolution pass over it.

use super::env::{apply_overrides, EnvSource};
use super::error::{ConfigError, ConfigResult};
use super::types::{
    CoreConfig, DatabaseConfig, EmailbotConfig, ImapConfig, LogConfig, Section, Sections,
};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Base name of the configuration file
pub const CONFIG_NAME: &str = "config";

/// Directories searched when no explicit file is given, in order
pub const DEFAULT_SEARCH_PATHS: &[&str] = &["/etc/app/", "."];

/// File names tried in each directory, in order
const CANDIDATES: &[&str] = &["config.yaml", "config.yml", CONFIG_NAME];

/// Where the configuration file comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// First match across these directories
    Search(Vec<PathBuf>),
    /// Exactly this file
    File(PathBuf),
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::Search(DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect())
    }
}

/// Locates, parses and resolves configuration
pub struct ConfigLoader;

impl ConfigLoader {
    /// Find the configuration file
    pub fn locate(source: &ConfigSource) -> ConfigResult<PathBuf> {
        match source {
            ConfigSource::File(path) => {
                if path.is_file() {
                    Ok(path.clone())
                } else {
                    Err(ConfigError::NotFound {
                        searched: vec![path.clone()],
                    })
                }
            }
            ConfigSource::Search(dirs) => {
                for dir in dirs {
                    for name in CANDIDATES {
                        let candidate = dir.join(name);
                        if candidate.is_file() {
                            debug!("Found configuration file: {}", candidate.display());
                            return Ok(candidate);
                        }
                    }
                }
                Err(ConfigError::NotFound {
                    searched: dirs.clone(),
                })
            }
        }
    }

    /// Read and parse the document at `path`
    pub fn read_document(path: &Path) -> ConfigResult<Value> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse_document(path, &content)
    }

    /// Parse YAML text, expanding `<<` merge keys and lowercasing every
    /// mapping key so section and field names match case-insensitively
    pub fn parse_document(path: &Path, content: &str) -> ConfigResult<Value> {
        let parse_error = |source: serde_yaml::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let mut document: Value = serde_yaml::from_str(content).map_err(parse_error)?;
        document.apply_merge().map_err(parse_error)?;
        lowercase_keys(&mut document);
        Ok(document)
    }

    /// Read the file at `path` and resolve every section from it
    pub fn load(path: &Path, env: &dyn EnvSource) -> ConfigResult<Sections> {
        info!("Loading configuration from: {}", path.display());
        let document = Self::read_document(path)?;
        Self::resolve(&document, env)
    }

    /// One resolution pass over a parsed document.
    ///
    /// Sections resolve in a fixed order; the first section error aborts
    /// the pass.
    pub fn resolve(document: &Value, env: &dyn EnvSource) -> ConfigResult<Sections> {
        Ok(Sections {
            core: Self::resolve_section::<CoreConfig>(document, env)?,
            log: Self::resolve_section::<LogConfig>(document, env)?,
            database: Self::resolve_section::<DatabaseConfig>(document, env)?,
            imap: Self::resolve_section::<ImapConfig>(document, env)?,
            emailbot: Self::resolve_section::<EmailbotConfig>(document, env)?,
        })
    }

    fn resolve_section<T: Section>(document: &Value, env: &dyn EnvSource) -> ConfigResult<T> {
        let subtree = match T::KEY {
            None => Some(document),
            Some(key) => document.get(key),
        };

        let mut section = match subtree {
            None | Some(Value::Null) => T::default(),
            Some(value) => {
                serde_yaml::from_value(value.clone()).map_err(|source| ConfigError::Section {
                    section: T::NAME,
                    source,
                })?
            }
        };

        for skipped in apply_overrides(&mut section, T::ENV, env) {
            warn!("{} section: {}", T::NAME, skipped);
        }

        Ok(section)
    }
}

/// Lowercase string keys at every depth; on a collision the later key wins
fn lowercase_keys(value: &mut Value) {
    match value {
        Value::Mapping(mapping) => {
            let entries = std::mem::take(mapping);
            for (key, mut child) in entries {
                lowercase_keys(&mut child);
                let key = match key {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                mapping.insert(key, child);
            }
        }
        Value::Sequence(items) => items.iter_mut().for_each(lowercase_keys),
        Value::Tagged(tagged) => lowercase_keys(&mut tagged.value),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const FULL: &str = r#"
delta: 30
log:
  level: 4
  path:
    - /var/log/bot.log
    - /tmp/bot.log
  time: true
database:
  host: db.local
  port: 5432
  name: mail
  user: bot
  pass: secret
  zone: Europe/Rome
  ssl: require
imap:
  host: imap.local
  port: 993
  user: inbox@example.com
  pass: hunter2
  msg: 50
emailbot:
  proc: 4
"#;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn document(text: &str) -> Value {
        ConfigLoader::parse_document(Path::new("config.yaml"), text).unwrap()
    }

    #[test]
    fn test_file_values_without_env() {
        let sections = ConfigLoader::resolve(&document(FULL), &no_env()).unwrap();

        assert_eq!(sections.core.delta, 30);
        assert_eq!(sections.log.level, 4);
        assert_eq!(sections.log.path, vec!["/var/log/bot.log", "/tmp/bot.log"]);
        assert!(sections.log.time);
        assert_eq!(sections.database.port, "5432");
        assert_eq!(sections.database.zone, "Europe/Rome");
        assert_eq!(sections.imap.server(), "imap.local:993");
        assert_eq!(sections.imap.msg, 50);
        assert_eq!(sections.emailbot.proc, 4);
    }

    #[test]
    fn test_env_overrides_file() {
        let env = env(&[
            ("DELTA", "5"),
            ("LOG_PATH", "a.log,b.log"),
            ("LOG_TIME", "false"),
            ("DATABASE_HOST", "override.local"),
            ("IMAP_PASS", "fromenv"),
            ("EMAILBOT_PROC", "9"),
        ]);
        let sections = ConfigLoader::resolve(&document(FULL), &env).unwrap();

        assert_eq!(sections.core.delta, 5);
        assert_eq!(sections.log.path, vec!["a.log", "b.log"]);
        assert!(!sections.log.time);
        assert_eq!(sections.database.host, "override.local");
        assert_eq!(sections.database.name, "mail");
        assert_eq!(sections.imap.pass, "fromenv");
        assert_eq!(sections.emailbot.proc, 9);
    }

    #[test]
    fn test_zero_values_when_nothing_is_set() {
        let sections = ConfigLoader::resolve(&document("log: ~\n"), &no_env()).unwrap();
        assert_eq!(sections, Sections::default());
    }

    #[test]
    fn test_empty_document_resolves_to_defaults() {
        let sections = ConfigLoader::resolve(&Value::Null, &no_env()).unwrap();
        assert_eq!(sections, Sections::default());
    }

    #[test]
    fn test_env_only_values() {
        let env = env(&[("IMAP_HOST", "h"), ("IMAP_PORT", "143"), ("LOG_LEVEL", "2")]);
        let sections = ConfigLoader::resolve(&document("delta: 1\n"), &env).unwrap();
        assert_eq!(sections.imap.server(), "h:143");
        assert_eq!(sections.log.level, 2);
    }

    #[test]
    fn test_invalid_override_keeps_file_value() {
        let env = env(&[
            ("LOG_LEVEL", "notanumber"),
            ("LOG_TIME", "maybe"),
            ("IMAP_MSG", "ten"),
            ("DELTA", "12"),
        ]);
        let sections = ConfigLoader::resolve(&document(FULL), &env).unwrap();

        assert_eq!(sections.log.level, 4);
        assert!(sections.log.time);
        assert_eq!(sections.imap.msg, 50);
        assert_eq!(sections.core.delta, 12);
    }

    #[test]
    fn test_malformed_section_aborts_pass() {
        let err = ConfigLoader::resolve(&document("delta: 1\nimap: just-a-string\n"), &no_env())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Section { section: "imap", .. }));
    }

    #[test]
    fn test_malformed_root_fails_core() {
        let err = ConfigLoader::resolve(&document("- a\n- b\n"), &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Section { section: "core", .. }));
    }

    #[test]
    fn test_merge_keys_are_expanded() {
        let text = r#"
defaults: &defaults
  host: shared.local
  port: 1000
database:
  <<: *defaults
  name: db
imap:
  <<: *defaults
  port: 993
"#;
        let sections = ConfigLoader::resolve(&document(text), &no_env()).unwrap();
        assert_eq!(sections.database.host, "shared.local");
        assert_eq!(sections.database.port, "1000");
        assert_eq!(sections.imap.server(), "shared.local:993");
    }

    #[test]
    fn test_keys_match_case_insensitively() {
        let text = "Delta: 7\nDatabase:\n  Host: db\n  SSLMode: x\nimap:\n  HOST: mail\n  Msg: 3\nLOG:\n  Path: [A.log]\n";
        let sections = ConfigLoader::resolve(&document(text), &no_env()).unwrap();

        assert_eq!(sections.core.delta, 7);
        assert_eq!(sections.database.host, "db");
        assert_eq!(sections.imap.host, "mail");
        assert_eq!(sections.imap.msg, 3);
        // values keep their case
        assert_eq!(sections.log.path, vec!["A.log"]);
    }

    #[test]
    fn test_parse_error() {
        let err = ConfigLoader::parse_document(Path::new("config.yaml"), "log: [unclosed\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_search_order() {
        let system = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::write(local.path().join("config.yaml"), "delta: 2\n").unwrap();

        let source = ConfigSource::Search(vec![system.path().into(), local.path().into()]);
        assert_eq!(
            ConfigLoader::locate(&source).unwrap(),
            local.path().join("config.yaml")
        );

        std::fs::write(system.path().join("config.yml"), "delta: 1\n").unwrap();
        assert_eq!(
            ConfigLoader::locate(&source).unwrap(),
            system.path().join("config.yml")
        );
    }

    #[test]
    fn test_not_found_lists_search_paths() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let source = ConfigSource::Search(vec![a.path().into(), b.path().into()]);

        match ConfigLoader::locate(&source) {
            Err(ConfigError::NotFound { searched }) => {
                assert_eq!(searched, vec![a.path().to_path_buf(), b.path().to_path_buf()]);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bot.yaml");
        assert!(matches!(
            ConfigLoader::locate(&ConfigSource::File(path.clone())),
            Err(ConfigError::NotFound { .. })
        ));

        std::fs::write(&path, "emailbot:\n  proc: 3\n").unwrap();
        let located = ConfigLoader::locate(&ConfigSource::File(path.clone())).unwrap();
        let sections = ConfigLoader::load(&located, &no_env()).unwrap();
        assert_eq!(sections.emailbot.proc, 3);
    }
}
