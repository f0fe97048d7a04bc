use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cascade::RetryPolicy;

/// Which service(s) this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    Rooms,
    Reservations,
    /// Both services in one process, sharing one channel client.
    All,
}

impl ServiceRole {
    pub fn runs_rooms(self) -> bool {
        matches!(self, ServiceRole::Rooms | ServiceRole::All)
    }

    pub fn runs_reservations(self) -> bool {
        matches!(self, ServiceRole::Reservations | ServiceRole::All)
    }
}

impl FromStr for ServiceRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rooms" => Ok(ServiceRole::Rooms),
            "reservations" => Ok(ServiceRole::Reservations),
            "all" => Ok(ServiceRole::All),
            _ => Err(ConfigError::Invalid { key: "ROOMKEEP_ROLE", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Memory,
    Kafka,
}

impl FromStr for ChannelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(ChannelKind::Memory),
            "kafka" => Ok(ChannelKind::Kafka),
            _ => Err(ConfigError::Invalid { key: "ROOMKEEP_CHANNEL", value: s.to_string() }),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub role: ServiceRole,
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub token: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub channel: ChannelKind,
    pub brokers: String,
    pub topic: String,
    pub group: String,
    pub retry: RetryPolicy,
    pub metrics_port: Option<u16>,
    pub log_json: bool,
}

/// Parse `key` if set; a value that fails to parse is an error, not a default.
fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    Ok(parsed::<u64>(lookup, key)?.map_or(default, Duration::from_secs))
}

impl Config {
    /// Read `ROOMKEEP_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = RetryPolicy::default();
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        Ok(Self {
            role: parsed(&lookup, "ROOMKEEP_ROLE")?.unwrap_or(ServiceRole::All),
            bind: string("ROOMKEEP_BIND", "0.0.0.0"),
            port: parsed(&lookup, "ROOMKEEP_PORT")?.unwrap_or(7411),
            data_dir: PathBuf::from(string("ROOMKEEP_DATA_DIR", "./data")),
            token: string("ROOMKEEP_TOKEN", "roomkeep"),
            max_connections: parsed(&lookup, "ROOMKEEP_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parsed(&lookup, "ROOMKEEP_COMPACT_THRESHOLD")?.unwrap_or(1000),
            channel: parsed(&lookup, "ROOMKEEP_CHANNEL")?.unwrap_or(ChannelKind::Memory),
            brokers: string("ROOMKEEP_KAFKA_BROKERS", "localhost:9092"),
            topic: string("ROOMKEEP_TOPIC", "room_events"),
            group: string("ROOMKEEP_CONSUMER_GROUP", "reservation-service"),
            retry: RetryPolicy {
                short_attempts: parsed(&lookup, "ROOMKEEP_RETRY_ATTEMPTS")?.unwrap_or(defaults.short_attempts),
                short_delay: secs(&lookup, "ROOMKEEP_RETRY_SHORT_SECS", defaults.short_delay)?,
                long_delay: secs(&lookup, "ROOMKEEP_RETRY_LONG_SECS", defaults.long_delay)?,
                connect_timeout: secs(&lookup, "ROOMKEEP_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
                poll_timeout: defaults.poll_timeout,
            },
            metrics_port: parsed(&lookup, "ROOMKEEP_METRICS_PORT")?,
            log_json: lookup("ROOMKEEP_LOG_JSON").is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        })
    }

    pub fn reservations_wal(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }

    pub fn rooms_wal(&self) -> PathBuf {
        self.data_dir.join("rooms.wal")
    }
}
