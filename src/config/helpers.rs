//! Environment resolution helpers shared by the config structs.

use std::env;
use std::str::FromStr;

use crate::error::ConfigError;

/// Read an optional environment variable.
///
/// Missing variables are `Ok(None)`; values that are not valid unicode are
/// an error rather than silently dropped.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(v) => Ok(Some(v)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            key: key.to_string(),
        }),
    }
}

/// Read and parse an optional environment variable, falling back to a default.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key)? {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Read an optional boolean environment variable.
pub(crate) fn optional_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be 'true' or 'false': {e}"),
        }),
        None => Ok(default),
    }
}

/// Read a comma-separated list from the environment.
///
/// Empty entries are dropped, so trailing commas are harmless.
pub(crate) fn optional_list_env(key: &str) -> Result<Option<Vec<String>>, ConfigError> {
    Ok(optional_env(key)?.map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_optional_env_default_when_missing() {
        let value: u64 = parse_optional_env("PROXYPROBE_TEST_MISSING_KEY", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_optional_list_env_splits_and_trims() {
        // SAFETY: test-only env mutation, key is unique to this test.
        unsafe { std::env::set_var("PROXYPROBE_TEST_LIST_KEY", "a, b,,c,") };
        let list = optional_list_env("PROXYPROBE_TEST_LIST_KEY").unwrap().unwrap();
        assert_eq!(list, vec!["a", "b", "c"]);
        unsafe { std::env::remove_var("PROXYPROBE_TEST_LIST_KEY") };
    }
}
