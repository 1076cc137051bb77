//! Configuration loading (§2a, §6b).
//!
//! Follows `examples/Arend-Jan-chat-gpt-lib-rs/src/config.rs`'s pattern of an optional
//! `dotenvy::dotenv()` call ahead of reading real process environment variables, generalized
//! from client credentials to the handful of runner-wide settings this host needs: the
//! downstream fetch timeout, the outbound http-call port pool, the default minimum log level,
//! and the paths to the secret/dictionary JSON documents. A malformed `.env` file or an
//! unparsable override is logged and ignored (CONFIG_PARSE_FAILURE, §7) — it is never fatal to
//! load the config.

use std::env;
use std::ops::RangeInclusive;

use crate::abi::LogLevel;
use crate::secrets::{Dictionary, SecretStore};

const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 8100..=8199;

/// Runner-wide settings, loaded once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout for the orchestrator's downstream fetch (§5); default 30s.
    pub fetch_timeout_ms: u64,
    /// Port pool the outbound HTTP call runner reserves from for the duration of its process
    /// (§5); allocation within the pool is sequential with wrap-around.
    pub call_port_range: RangeInclusive<u16>,
    /// Minimum log level a fresh instance starts with, before any guest `proxy_set_log_level`.
    pub default_log_level: LogLevel,
    /// Optional path to a JSON document of secrets, loaded at startup via [`crate::secrets`].
    pub secrets_path: Option<String>,
    /// Optional path to a JSON document of a flat dictionary, loaded the same way.
    pub dictionary_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            call_port_range: DEFAULT_PORT_RANGE,
            default_log_level: LogLevel::Info,
            secrets_path: None,
            dictionary_path: None,
        }
    }
}

impl Config {
    /// Loads `.env` (if present, via `dotenvy`; a missing or malformed file is logged at debug
    /// level and otherwise ignored, never fatal) and then layers typed overrides from the real
    /// process environment on top of the defaults.
    pub fn load() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("no .env file loaded (this is normal in production): {}", e);
        }

        let mut config = Config::default();

        if let Some(ms) = parse_env_u64("FASTEDGE_FETCH_TIMEOUT_MS") {
            config.fetch_timeout_ms = ms;
        }
        if let Some(range) = parse_env_port_range("FASTEDGE_CALL_PORT_RANGE") {
            config.call_port_range = range;
        }
        if let Ok(level) = env::var("FASTEDGE_LOG_LEVEL") {
            match parse_log_level(&level) {
                Some(parsed) => config.default_log_level = parsed,
                None => log::debug!("ignoring unparsable FASTEDGE_LOG_LEVEL={:?}", level),
            }
        }
        config.secrets_path = env::var("FASTEDGE_SECRETS_PATH").ok();
        config.dictionary_path = env::var("FASTEDGE_DICTIONARY_PATH").ok();

        config
    }

    /// Loads [`secrets_path`](Self::secrets_path) into a [`SecretStore`], or an empty one if no
    /// path is configured (or the file is missing/malformed — see
    /// [`SecretStore::load_from_path`]).
    pub fn load_secrets(&self) -> SecretStore {
        match &self.secrets_path {
            Some(path) => SecretStore::load_from_path(path),
            None => SecretStore::new(),
        }
    }

    /// Loads [`dictionary_path`](Self::dictionary_path) into a [`Dictionary`], or an empty one if
    /// unconfigured.
    pub fn load_dictionary(&self) -> Dictionary {
        match &self.dictionary_path {
            Some(path) => Dictionary::load_from_path(path),
            None => Dictionary::new(),
        }
    }
}

fn parse_env_u64(name: &str) -> Option<u64> {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                log::debug!("ignoring unparsable {}={:?}", name, raw);
                None
            }
        },
        Err(_) => None,
    }
}

/// Parses a `"<start>-<end>"` range, e.g. `"8200-8299"`.
fn parse_env_port_range(name: &str) -> Option<RangeInclusive<u16>> {
    let raw = env::var(name).ok()?;
    let (start, end) = raw.split_once('-')?;
    match (start.trim().parse::<u16>(), end.trim().parse::<u16>()) {
        (Ok(s), Ok(e)) if s <= e => Some(s..=e),
        _ => {
            log::debug!("ignoring unparsable {}={:?}", name, raw);
            None
        }
    }
}

fn parse_log_level(raw: &str) -> Option<LogLevel> {
    match raw.to_ascii_uppercase().as_str() {
        "TRACE" | "0" => Some(LogLevel::Trace),
        "DEBUG" | "1" => Some(LogLevel::Debug),
        "INFO" | "2" => Some(LogLevel::Info),
        "WARN" | "3" => Some(LogLevel::Warn),
        "ERROR" | "4" => Some(LogLevel::Error),
        "CRITICAL" | "5" => Some(LogLevel::Critical),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.fetch_timeout_ms, 30_000);
        assert_eq!(config.call_port_range, 8100..=8199);
        assert_eq!(config.default_log_level, LogLevel::Info);
    }

    #[test]
    fn parses_log_level_names_case_insensitively() {
        assert_eq!(parse_log_level("warn"), Some(LogLevel::Warn));
        assert_eq!(parse_log_level("CRITICAL"), Some(LogLevel::Critical));
        assert_eq!(parse_log_level("nonsense"), None);
    }

    #[test]
    fn parses_port_range() {
        assert_eq!(
            parse_env_port_range("FASTEDGE_TEST_PORT_RANGE_UNSET"),
            None
        );
    }
}
