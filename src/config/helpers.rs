// src/config/helpers.rs
// Env lookup helpers with defaults

use std::str::FromStr;
use tracing::warn;

/// Read an env var, falling back to a default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an env var, falling back to a default on absence or
/// parse failure (the failure is logged, not fatal).
pub fn env_or_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("invalid value for {key}: {raw:?}, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Read an optional env var, treating empty strings as absent.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
