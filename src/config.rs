//! Session configuration loading: JSON file, environment overrides, defaults.

use std::{env, fmt, fs, io::ErrorKind, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::buffer::DEFAULT_BUFFER_CAPACITY;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/session.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "REALTIME_ROOMS_CONFIG_PATH";

const BUFFER_CAPACITY_ENV: &str = "REALTIME_ROOMS_BUFFER_CAPACITY";
const CLEANUP_DELAY_ENV: &str = "REALTIME_ROOMS_CLEANUP_DELAY_MS";
const FORCED_CLEANUP_DELAY_ENV: &str = "REALTIME_ROOMS_FORCED_CLEANUP_DELAY_MS";
const BROADCAST_INTERVAL_ENV: &str = "REALTIME_ROOMS_BROADCAST_INTERVAL_MS";
const ROLE_ENV: &str = "REALTIME_ROOMS_ROLE";

const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_FORCED_CLEANUP_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_OBSERVER_CHANNEL_CAPACITY: usize = 64;

/// Whether this process owns rounds or mirrors another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    /// Runs rounds and answers snapshot requests.
    #[default]
    Authoritative,
    /// Replica applying events published by the authoritative process.
    Observer,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Authoritative => f.write_str("authoritative"),
            ProcessRole::Observer => f.write_str("observer"),
        }
    }
}

impl FromStr for ProcessRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "authoritative" => Ok(ProcessRole::Authoritative),
            "observer" => Ok(ProcessRole::Observer),
            other => Err(format!("unknown process role `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Immutable runtime configuration shared across the application.
pub struct SessionConfig {
    /// Frames retained per player.
    pub buffer_capacity: usize,
    /// Delay between a round end and the session cleanup.
    pub cleanup_delay: Duration,
    /// Delay between a round end and the forced cleanup backstop.
    pub forced_cleanup_delay: Duration,
    /// Period of the leaderboard broadcast tick.
    pub broadcast_interval: Duration,
    /// Skip ticks whose leaderboard equals the last pushed one.
    pub broadcast_only_on_change: bool,
    /// Push the leaderboard right after every accepted score instead of
    /// waiting for the next tick.
    pub push_on_score: bool,
    /// Per-room observer channel capacity.
    pub observer_channel_capacity: usize,
    /// Whether this process runs rounds or mirrors them.
    pub role: ProcessRole,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            forced_cleanup_delay: DEFAULT_FORCED_CLEANUP_DELAY,
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            broadcast_only_on_change: true,
            push_on_score: false,
            observer_channel_capacity: DEFAULT_OBSERVER_CHANNEL_CAPACITY,
            role: ProcessRole::Authoritative,
        }
    }
}

impl SessionConfig {
    /// Load the configuration from disk and the environment, falling back to
    /// built-in defaults for anything missing or invalid.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let raw = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded session config");
                    raw
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    RawConfig::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                RawConfig::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                RawConfig::default()
            }
        };

        let mut config = Self::from(raw);
        config.apply_overrides(|key| env::var(key).ok());
        info!(
            role = %config.role,
            buffer_capacity = config.buffer_capacity,
            cleanup_delay_ms = config.cleanup_delay.as_millis() as u64,
            forced_cleanup_delay_ms = config.forced_cleanup_delay.as_millis() as u64,
            broadcast_interval_ms = config.broadcast_interval.as_millis() as u64,
            "session config ready"
        );
        config
    }

    /// Apply overrides read through `lookup` (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_override::<usize>(&lookup, BUFFER_CAPACITY_ENV) {
            self.buffer_capacity = non_zero(BUFFER_CAPACITY_ENV, value, DEFAULT_BUFFER_CAPACITY);
        }
        if let Some(ms) = parse_override::<u64>(&lookup, CLEANUP_DELAY_ENV) {
            self.cleanup_delay = non_zero_ms(CLEANUP_DELAY_ENV, ms, DEFAULT_CLEANUP_DELAY);
        }
        if let Some(ms) = parse_override::<u64>(&lookup, FORCED_CLEANUP_DELAY_ENV) {
            self.forced_cleanup_delay =
                non_zero_ms(FORCED_CLEANUP_DELAY_ENV, ms, DEFAULT_FORCED_CLEANUP_DELAY);
        }
        if let Some(ms) = parse_override::<u64>(&lookup, BROADCAST_INTERVAL_ENV) {
            self.broadcast_interval =
                non_zero_ms(BROADCAST_INTERVAL_ENV, ms, DEFAULT_BROADCAST_INTERVAL);
        }
        if let Some(role) = parse_override::<ProcessRole>(&lookup, ROLE_ENV) {
            self.role = role;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    buffer_capacity: Option<usize>,
    cleanup_delay_ms: Option<u64>,
    forced_cleanup_delay_ms: Option<u64>,
    broadcast_interval_ms: Option<u64>,
    broadcast_only_on_change: Option<bool>,
    push_on_score: Option<bool>,
    observer_channel_capacity: Option<usize>,
    role: Option<ProcessRole>,
}

impl From<RawConfig> for SessionConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            buffer_capacity: value.buffer_capacity.map_or(defaults.buffer_capacity, |v| {
                non_zero("buffer_capacity", v, DEFAULT_BUFFER_CAPACITY)
            }),
            cleanup_delay: value.cleanup_delay_ms.map_or(defaults.cleanup_delay, |ms| {
                non_zero_ms("cleanup_delay_ms", ms, DEFAULT_CLEANUP_DELAY)
            }),
            forced_cleanup_delay: value
                .forced_cleanup_delay_ms
                .map_or(defaults.forced_cleanup_delay, |ms| {
                    non_zero_ms("forced_cleanup_delay_ms", ms, DEFAULT_FORCED_CLEANUP_DELAY)
                }),
            broadcast_interval: value
                .broadcast_interval_ms
                .map_or(defaults.broadcast_interval, |ms| {
                    non_zero_ms("broadcast_interval_ms", ms, DEFAULT_BROADCAST_INTERVAL)
                }),
            broadcast_only_on_change: value
                .broadcast_only_on_change
                .unwrap_or(defaults.broadcast_only_on_change),
            push_on_score: value.push_on_score.unwrap_or(defaults.push_on_score),
            observer_channel_capacity: value
                .observer_channel_capacity
                .map_or(defaults.observer_channel_capacity, |v| {
                    non_zero(
                        "observer_channel_capacity",
                        v,
                        DEFAULT_OBSERVER_CHANNEL_CAPACITY,
                    )
                }),
            role: value.role.unwrap_or(defaults.role),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, value = %raw, error = %err, "ignoring invalid config override");
            None
        }
    }
}

fn non_zero(key: &str, value: usize, default: usize) -> usize {
    if value == 0 {
        warn!(key, default, "zero is not allowed; using default");
        default
    } else {
        value
    }
}

fn non_zero_ms(key: &str, ms: u64, default: Duration) -> Duration {
    if ms == 0 {
        warn!(
            key,
            default_ms = default.as_millis() as u64,
            "zero is not allowed; using default"
        );
        default
    } else {
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let raw: RawConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(SessionConfig::from(raw), SessionConfig::default());
    }

    #[test]
    fn file_values_are_applied_and_zeroes_rejected() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "buffer_capacity": 0,
                "cleanup_delay_ms": 250,
                "broadcast_interval_ms": 0,
                "broadcast_only_on_change": false,
                "role": "observer"
            }"#,
        )
        .unwrap();
        let config = SessionConfig::from(raw);

        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(config.cleanup_delay, Duration::from_millis(250));
        assert_eq!(config.broadcast_interval, DEFAULT_BROADCAST_INTERVAL);
        assert!(!config.broadcast_only_on_change);
        assert_eq!(config.role, ProcessRole::Observer);
    }

    #[test]
    fn environment_overrides_win() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (BUFFER_CAPACITY_ENV, "12"),
            (FORCED_CLEANUP_DELAY_ENV, "1500"),
            (CLEANUP_DELAY_ENV, "not-a-number"),
            (ROLE_ENV, "Observer"),
        ]);
        let mut config = SessionConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.buffer_capacity, 12);
        assert_eq!(config.forced_cleanup_delay, Duration::from_millis(1500));
        assert_eq!(config.cleanup_delay, DEFAULT_CLEANUP_DELAY);
        assert_eq!(config.role, ProcessRole::Observer);
    }
}
