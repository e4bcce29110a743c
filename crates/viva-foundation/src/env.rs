//! Environment lookup helpers with typed defaults. Handlers never read the
//! environment directly; configuration is assembled once at startup.

use std::env;

/// Reads a string variable, falling back to `default` when unset or empty.
pub fn env_str(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

/// Reads a string variable with an ordered fallback chain, returning the
/// first non-empty value, or `default` when none is set.
pub fn env_str_chain(keys: &[&str], default: &str) -> String {
    for key in keys {
        if let Ok(v) = env::var(key) {
            if !v.is_empty() {
                return v;
            }
        }
    }
    default.to_string()
}

/// Reads an integer variable, falling back to `default` when unset or
/// unparsable.
pub fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}
