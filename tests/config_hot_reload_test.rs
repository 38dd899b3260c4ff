//! Configuration Hot-Reload Integration Tests

use anyhow::Result;
use mailbot_config::config::{ConfigError, ConfigResolver, ReloadEvent, ReloadPolicy};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;
use tokio_stream::StreamExt;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn write_config(dir: &TempDir, delta: i64, proc: i64) -> Result<PathBuf> {
    let path = dir.path().join("config.yaml");
    fs::write(&path, create_test_config(delta, proc))?;
    Ok(path)
}

#[tokio::test]
async fn test_config_hot_reload_integration() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_config(&temp_dir, 10, 2)?;

    let resolver = ConfigResolver::builder()
        .search_paths([temp_dir.path()])
        .env(env(&[("IMAP_USER", "from-env")]))
        .policy(ReloadPolicy::KeepCurrent)
        .settle_delay(Duration::from_millis(50))
        .build()?;
    let mut changes = resolver.subscribe();

    assert_eq!(resolver.delta(), 10);
    assert_eq!(resolver.imap_user(), "from-env");
    let before = resolver.snapshot();

    // Only core.delta changes on disk
    write_config(&temp_dir, 60, 2)?;

    tokio::select! {
        change = changes.next() => {
            match change.unwrap()? {
                ReloadEvent::Applied { sections, .. } => assert_eq!(sections.core.delta, 60),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        _ = sleep(Duration::from_secs(5)) => {
            panic!("Configuration change event not received within timeout");
        }
    }

    assert_eq!(resolver.delta(), 60);
    let after = resolver.snapshot();
    assert_eq!(after.log, before.log);
    assert_eq!(after.database, before.database);
    assert_eq!(after.imap, before.imap);
    assert_eq!(after.emailbot, before.emailbot);
    // overrides are re-applied on every pass
    assert_eq!(resolver.imap_user(), "from-env");

    Ok(())
}

#[tokio::test]
async fn test_invalid_config_keeps_current_values() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = write_config(&temp_dir, 10, 2)?;

    let resolver = ConfigResolver::builder()
        .search_paths([temp_dir.path()])
        .env(env(&[]))
        .policy(ReloadPolicy::KeepCurrent)
        .settle_delay(Duration::from_millis(50))
        .build()?;
    let mut changes = resolver.subscribe();

    fs::write(&config_path, "log: [[[\n")?;

    tokio::select! {
        change = changes.next() => {
            let event = change.unwrap()?;
            assert!(matches!(event, ReloadEvent::Rejected { .. }), "got {:?}", event);
        }
        _ = sleep(Duration::from_secs(5)) => {
            panic!("Rejection event not received within timeout");
        }
    }

    assert_eq!(resolver.delta(), 10);
    assert_eq!(resolver.emailbot_proc(), 2);
    assert!(!resolver.is_faulted());

    Ok(())
}

#[tokio::test]
async fn test_invalid_config_escalates() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = write_config(&temp_dir, 10, 2)?;

    let resolver = ConfigResolver::builder()
        .search_paths([temp_dir.path()])
        .env(env(&[]))
        .settle_delay(Duration::from_millis(50))
        .build()?;
    let mut changes = resolver.subscribe();

    fs::write(&config_path, "database: [not, a, mapping]\n")?;

    tokio::select! {
        change = changes.next() => {
            match change.unwrap()? {
                ReloadEvent::Fatal { error, .. } => {
                    assert!(matches!(*error, ConfigError::Section { section: "database", .. }));
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        _ = sleep(Duration::from_secs(5)) => {
            panic!("Fault event not received within timeout");
        }
    }

    assert!(resolver.is_faulted());
    assert_eq!(resolver.delta(), 10);
    assert!(resolver.database_url().starts_with("host=db.local  port=5432"));

    // stop watching before the subscriber goes away
    drop(resolver);
    Ok(())
}

#[tokio::test]
async fn test_config_force_reload() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_config(&temp_dir, 10, 2)?;

    let resolver = ConfigResolver::builder()
        .search_paths([temp_dir.path()])
        .env(env(&[("EMAILBOT_PROC", "7")]))
        .watch(false)
        .build()?;
    let mut changes = resolver.subscribe();

    write_config(&temp_dir, 15, 3)?;
    resolver.reload()?;

    tokio::select! {
        change = changes.next() => {
            match change.unwrap()? {
                ReloadEvent::Applied { sections, .. } => {
                    assert_eq!(sections.core.delta, 15);
                    assert_eq!(sections.emailbot.proc, 7);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        _ = sleep(Duration::from_secs(2)) => {
            panic!("Change event not received within timeout");
        }
    }

    Ok(())
}

#[test]
fn test_startup_errors() -> Result<()> {
    let empty = TempDir::new()?;
    let err = ConfigResolver::builder()
        .search_paths([empty.path()])
        .watch(false)
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }));

    let broken = TempDir::new()?;
    fs::write(broken.path().join("config.yaml"), "delta: [unclosed\n")?;
    let err = ConfigResolver::builder()
        .search_paths([broken.path()])
        .watch(false)
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));

    Ok(())
}

#[test]
fn test_log_writers_with_unwritable_first_path() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let unwritable = temp_dir.path().join("missing").join("first.log");
    let writable = temp_dir.path().join("second.log");
    let paths = format!("{},{}", unwritable.display(), writable.display());
    write_config(&temp_dir, 10, 2)?;

    let resolver = ConfigResolver::builder()
        .search_paths([temp_dir.path()])
        .env(env(&[("LOG_PATH", paths.as_str())]))
        .watch(false)
        .build()?;

    let err = resolver.log_writers().unwrap_err();
    assert_eq!(err.writers.len(), 2);
    assert!(err.writers[0].is_stdout());
    assert_eq!(err.writers[1].path(), Some(writable.as_path()));
    assert_eq!(err.failures.len(), 1);

    Ok(())
}

#[test]
fn test_invalid_env_override_is_skipped() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_config(&temp_dir, 10, 2)?;

    let resolver = ConfigResolver::builder()
        .search_paths([temp_dir.path()])
        .env(env(&[("LOG_LEVEL", "notanumber"), ("LOG_TIME", "1")]))
        .watch(false)
        .build()?;

    assert_eq!(resolver.log_level(), 4);
    assert!(resolver.log_time());

    Ok(())
}

fn create_test_config(delta: i64, proc: i64) -> String {
    format!(
        r#"
delta: {}
log:
  level: 4
  time: false
database:
  host: db.local
  port: 5432
  name: mail
  user: bot
  pass: secret
  zone: UTC
  ssl: disable
imap:
  host: imap.local
  port: 993
  user: inbox
  pass: hunter2
  msg: 25
emailbot:
  proc: {}
"#,
        delta, proc
    )
}
