//! Configuration Types

use super::env::{parse_bool, parse_int, parse_uint, split_list, EnvBinding};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A named group of fields resolved from one sub-tree of the document
pub trait Section: DeserializeOwned + Default + 'static {
    /// Section name used in diagnostics
    const NAME: &'static str;
    /// Key of the sub-tree; `None` reads the document root
    const KEY: Option<&'static str>;
    /// Environment override table
    const ENV: &'static [EnvBinding<Self>];
}

/// Every section from one resolution pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sections {
    pub core: CoreConfig,
    pub log: LogConfig,
    pub database: DatabaseConfig,
    pub imap: ImapConfig,
    pub emailbot: EmailbotConfig,
}

/// Core timing
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Wait between application cycles
    #[serde(deserialize_with = "lenient::int")]
    pub delta: i64,
}

/// Logging
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    #[serde(deserialize_with = "lenient::uint")]
    pub level: u64,
    #[serde(deserialize_with = "lenient::list")]
    pub path: Vec<String>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub time: bool,
}

/// Postgres connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(deserialize_with = "lenient::string")]
    pub host: String,
    #[serde(deserialize_with = "lenient::string")]
    pub port: String,
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub user: String,
    #[serde(deserialize_with = "lenient::string")]
    pub pass: String,
    #[serde(deserialize_with = "lenient::string")]
    pub zone: String,
    #[serde(deserialize_with = "lenient::string")]
    pub ssl: String,
}

impl DatabaseConfig {
    /// Connection descriptor in key=value form
    pub fn url(&self) -> String {
        format!(
            "host={}  port={}  dbname={}  user={}  password={}  sslmode={}  TimeZone={}",
            self.host, self.port, self.name, self.user, self.pass, self.ssl, self.zone
        )
    }
}

/// Mail retrieval
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ImapConfig {
    #[serde(deserialize_with = "lenient::string")]
    pub host: String,
    #[serde(deserialize_with = "lenient::string")]
    pub port: String,
    #[serde(deserialize_with = "lenient::string")]
    pub user: String,
    #[serde(deserialize_with = "lenient::string")]
    pub pass: String,
    /// Messages fetched per cycle
    #[serde(deserialize_with = "lenient::int")]
    pub msg: i64,
}

impl ImapConfig {
    pub fn server(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Mail processing bot
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EmailbotConfig {
    /// Mailboxes processed at a time
    #[serde(deserialize_with = "lenient::int")]
    pub proc: i64,
}

impl Section for CoreConfig {
    const NAME: &'static str = "core";
    const KEY: Option<&'static str> = None;
    const ENV: &'static [EnvBinding<Self>] = &[EnvBinding {
        field: "delta",
        key: "DELTA",
        apply: |c, v| parse_int(v).map(|n| c.delta = n),
    }];
}

impl Section for LogConfig {
    const NAME: &'static str = "log";
    const KEY: Option<&'static str> = Some("log");
    const ENV: &'static [EnvBinding<Self>] = &[
        EnvBinding {
            field: "level",
            key: "LOG_LEVEL",
            apply: |c, v| parse_uint(v).map(|n| c.level = n),
        },
        EnvBinding {
            field: "path",
            key: "LOG_PATH",
            apply: |c, v| {
                c.path = split_list(v);
                Ok(())
            },
        },
        EnvBinding {
            field: "time",
            key: "LOG_TIME",
            apply: |c, v| parse_bool(v).map(|b| c.time = b),
        },
    ];
}

impl Section for DatabaseConfig {
    const NAME: &'static str = "database";
    const KEY: Option<&'static str> = Some("database");
    const ENV: &'static [EnvBinding<Self>] = &[
        EnvBinding {
            field: "host",
            key: "DATABASE_HOST",
            apply: |c, v| text(&mut c.host, v),
        },
        EnvBinding {
            field: "port",
            key: "DATABASE_PORT",
            apply: |c, v| text(&mut c.port, v),
        },
        EnvBinding {
            field: "name",
            key: "DATABASE_NAME",
            apply: |c, v| text(&mut c.name, v),
        },
        EnvBinding {
            field: "user",
            key: "DATABASE_USER",
            apply: |c, v| text(&mut c.user, v),
        },
        EnvBinding {
            field: "pass",
            key: "DATABASE_PASS",
            apply: |c, v| text(&mut c.pass, v),
        },
        EnvBinding {
            field: "zone",
            key: "DATABASE_ZONE",
            apply: |c, v| text(&mut c.zone, v),
        },
        EnvBinding {
            field: "ssl",
            key: "DATABASE_SSL",
            apply: |c, v| text(&mut c.ssl, v),
        },
    ];
}

impl Section for ImapConfig {
    const NAME: &'static str = "imap";
    const KEY: Option<&'static str> = Some("imap");
    const ENV: &'static [EnvBinding<Self>] = &[
        EnvBinding {
            field: "host",
            key: "IMAP_HOST",
            apply: |c, v| text(&mut c.host, v),
        },
        EnvBinding {
            field: "port",
            key: "IMAP_PORT",
            apply: |c, v| text(&mut c.port, v),
        },
        EnvBinding {
            field: "user",
            key: "IMAP_USER",
            apply: |c, v| text(&mut c.user, v),
        },
        EnvBinding {
            field: "pass",
            key: "IMAP_PASS",
            apply: |c, v| text(&mut c.pass, v),
        },
        EnvBinding {
            field: "msg",
            key: "IMAP_MSG",
            apply: |c, v| parse_int(v).map(|n| c.msg = n),
        },
    ];
}

impl Section for EmailbotConfig {
    const NAME: &'static str = "emailbot";
    const KEY: Option<&'static str> = Some("emailbot");
    const ENV: &'static [EnvBinding<Self>] = &[EnvBinding {
        field: "proc",
        key: "EMAILBOT_PROC",
        apply: |c, v| parse_int(v).map(|n| c.proc = n),
    }];
}

fn text(slot: &mut String, value: &str) -> Result<(), String> {
    *slot = value.to_string();
    Ok(())
}

/// Weakly typed field decoding: scalars convert between string, number and
/// boolean forms, a string scalar becomes a comma-split list, and `null`
/// or an empty string is the zero value.
mod lenient {
    use crate::config::env::{parse_bool, parse_int, parse_uint, split_list};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_yaml::Value;

    fn kind(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "a boolean",
            Value::Number(_) => "a number",
            Value::String(_) => "a string",
            Value::Sequence(_) => "a sequence",
            Value::Mapping(_) => "a mapping",
            Value::Tagged(_) => "a tagged value",
        }
    }

    fn scalar_text(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            _ => None,
        }
    }

    /// Finite float with its fractional part dropped
    fn truncated(n: &serde_yaml::Number) -> Option<f64> {
        n.as_f64().filter(|f| f.is_finite()).map(f64::trunc)
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let value = Value::deserialize(d)?;
        match value {
            Value::Null => Ok(String::new()),
            other => scalar_text(&other)
                .ok_or_else(|| D::Error::custom(format!("expected a string, found {}", kind(&other)))),
        }
    }

    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(d)?;
        match &value {
            Value::Null => Ok(0),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    truncated(n)
                        .filter(|f| *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                        .map(|f| f as i64)
                })
                .ok_or_else(|| D::Error::custom(format!("expected an integer, found {}", n))),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::String(s) if s.is_empty() => Ok(0),
            Value::String(s) => parse_int(s).map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "expected an integer, found {}",
                kind(other)
            ))),
        }
    }

    pub fn uint<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let value = Value::deserialize(d)?;
        match &value {
            Value::Null => Ok(0),
            Value::Number(n) => n
                .as_u64()
                .or_else(|| {
                    truncated(n)
                        .filter(|f| *f >= 0.0 && *f <= u64::MAX as f64)
                        .map(|f| f as u64)
                })
                .ok_or_else(|| {
                    D::Error::custom(format!("expected an unsigned integer, found {}", n))
                }),
            Value::Bool(b) => Ok(u64::from(*b)),
            Value::String(s) if s.is_empty() => Ok(0),
            Value::String(s) => parse_uint(s).map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "expected an unsigned integer, found {}",
                kind(other)
            ))),
        }
    }

    pub fn boolean<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let value = Value::deserialize(d)?;
        match &value {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
            Value::String(s) if s.is_empty() => Ok(false),
            Value::String(s) => parse_bool(s).map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "expected a boolean, found {}",
                kind(other)
            ))),
        }
    }

    pub fn list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        let value = Value::deserialize(d)?;
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    scalar_text(item).ok_or_else(|| {
                        D::Error::custom(format!("expected a list of strings, found {}", kind(item)))
                    })
                })
                .collect(),
            // a string holds a comma-separated list, like LOG_PATH
            Value::String(s) if s.is_empty() => Ok(Vec::new()),
            Value::String(s) => Ok(split_list(&s)),
            other => scalar_text(&other).map(|s| vec![s]).ok_or_else(|| {
                D::Error::custom(format!("expected a list of strings, found {}", kind(&other)))
            }),
        }
    }
}
