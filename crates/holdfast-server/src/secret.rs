//! Secret reference resolver.
//!
//! Credential values in the configuration file may reference the
//! environment instead of carrying the secret inline:
//!
//! - `env::VAR_NAME` - reads `$VAR_NAME` from the environment
//! - anything else - returned as-is (plain text)

use crate::error::ConfigError;

/// Resolves a value that may contain a secret reference prefix.
pub fn resolve(value: &str) -> Result<String, ConfigError> {
    match value.strip_prefix("env::") {
        Some(var) => std::env::var(var).map_err(|_| {
            ConfigError::Secret(format!("environment variable `{}` is not set", var))
        }),
        None => Ok(value.to_string()),
    }
}
