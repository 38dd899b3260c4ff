//! Environment Overrides
//!
//! Every overridable field is listed in an explicit binding table
//! (field name, environment key, typed parser). Overrides are applied per
//! field: a value that fails to convert is reported and skipped, the file
//! value stays in place, and the remaining bindings are still applied.

use super::error::ConfigError;
use std::collections::HashMap;

/// Source of environment values
pub trait EnvSource {
    /// Look up a variable; `None` when unset or not valid unicode
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl EnvSource for HashMap<&'static str, &'static str> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }
}

/// Applies a raw environment value to one field of `T`
pub type ApplyFn<T> = fn(&mut T, &str) -> Result<(), String>;

/// One row of a section's override table
pub struct EnvBinding<T> {
    pub field: &'static str,
    pub key: &'static str,
    pub apply: ApplyFn<T>,
}

impl<T> std::fmt::Debug for EnvBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvBinding")
            .field("field", &self.field)
            .field("key", &self.key)
            .finish()
    }
}

/// Apply every binding whose variable is set and non-empty.
///
/// Returns the overrides that were skipped because their value did not
/// convert to the field's type.
pub fn apply_overrides<T>(
    target: &mut T,
    bindings: &[EnvBinding<T>],
    env: &dyn EnvSource,
) -> Vec<ConfigError> {
    let mut skipped = Vec::new();

    for binding in bindings {
        let Some(value) = env.var(binding.key) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }

        match (binding.apply)(target, &value) {
            Ok(()) => {
                tracing::debug!("Applied {} override to '{}'", binding.key, binding.field);
            }
            Err(reason) => skipped.push(ConfigError::EnvOverride {
                key: binding.key,
                value,
                reason,
            }),
        }
    }

    skipped
}

/// Signed base-10 integer
pub fn parse_int(value: &str) -> Result<i64, String> {
    value
        .parse::<i64>()
        .map_err(|e| format!("expected an integer: {}", e))
}

/// Unsigned base-10 integer
pub fn parse_uint(value: &str) -> Result<u64, String> {
    value
        .parse::<u64>()
        .map_err(|e| format!("expected an unsigned integer: {}", e))
}

/// Boolean in the `1/t/T/TRUE/true/True` and `0/f/F/FALSE/false/False` family
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(format!("expected a boolean, found {:?}", other)),
    }
}

/// Comma-separated list, order preserved
pub fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::to_string).collect()
}
