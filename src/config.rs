use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde_derive::Deserialize;

use crate::prober::ProbeTarget;

const DEFAULT_PROBE_COUNT: u32 = 3;
const DEFAULT_ATTEMPT_TIMEOUT_SECONDS: u64 = 1;
const DEFAULT_PERIOD_SECONDS: u64 = 30;
const BUDGET_MULTIPLIER: u32 = 3;
const DEFAULT_PING_PROGRAM: &str = "ping";

/// Longest period, timeout or round budget accepted. Keeps deadline
/// arithmetic on `Instant` well inside its range.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No locations configured")]
    NoLocations,

    #[error("Location with address {0} has an empty label")]
    EmptyLabel(String),

    #[error("Location label '{0}' is configured more than once")]
    DuplicateLabel(String),

    #[error("Probe count for '{0}' must be at least 1")]
    ZeroProbeCount(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("{0} must not exceed {max} seconds", max = MAX_DURATION.as_secs())]
    DurationTooLarge(&'static str),
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: Option<MqttConfig>,
    pub device: DeviceConfig,
    pub locations: Vec<Location>,
    pub probe: Option<ProbeConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    /// Locations that do not count as "away". Unset means anywhere found is home.
    pub home_locations: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Location {
    pub address: String,
    pub label: String,
    pub probe_count: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// The first probe to come back positive decides the round.
    #[default]
    FirstPositive,
    /// Every probe is awaited; the smallest positive label wins.
    WaitForAll,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ProbeConfig {
    pub count: Option<u32>,
    pub attempt_timeout_seconds: Option<u64>,
    pub period_seconds: Option<u64>,
    pub round_budget_seconds: Option<u64>,
    pub policy: Option<ResolutionPolicy>,
    pub ping_program: Option<String>,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::de::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.locations.is_empty() {
            return Err(ConfigError::NoLocations);
        }

        let mut seen = HashSet::new();
        for location in &self.locations {
            if location.label.trim().is_empty() {
                return Err(ConfigError::EmptyLabel(location.address.clone()));
            }
            if !seen.insert(location.label.as_str()) {
                return Err(ConfigError::DuplicateLabel(location.label.clone()));
            }
        }

        for target in self.targets() {
            if target.probe_count == 0 {
                return Err(ConfigError::ZeroProbeCount(target.label));
            }
        }

        let durations = [
            ("probe.attempt_timeout_seconds", self.attempt_timeout()),
            ("probe.period_seconds", self.period()),
            ("probe.round_budget_seconds", self.round_budget()),
        ];
        for (name, duration) in durations {
            if duration.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
            if duration > MAX_DURATION {
                return Err(ConfigError::DurationTooLarge(name));
            }
        }

        Ok(())
    }

    fn probe_config(&self) -> ProbeConfig {
        self.probe.clone().unwrap_or_default()
    }

    /// Targets in configured order, with the default probe count filled in.
    pub fn targets(&self) -> Vec<ProbeTarget> {
        let default_count = self.probe_config().count.unwrap_or(DEFAULT_PROBE_COUNT);
        self.locations
            .iter()
            .map(|location| ProbeTarget {
                address: location.address.clone(),
                label: location.label.clone(),
                probe_count: location.probe_count.unwrap_or(default_count),
            })
            .collect()
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(
            self.probe_config()
                .attempt_timeout_seconds
                .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT_SECONDS),
        )
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(
            self.probe_config()
                .period_seconds
                .unwrap_or(DEFAULT_PERIOD_SECONDS),
        )
    }

    /// Upper bound on a single round. Defaults to a few times the slowest
    /// target's full echo sequence.
    pub fn round_budget(&self) -> Duration {
        match self.probe_config().round_budget_seconds {
            Some(seconds) => Duration::from_secs(seconds),
            None => {
                let max_count = self
                    .targets()
                    .iter()
                    .map(|target| target.probe_count)
                    .max()
                    .unwrap_or(DEFAULT_PROBE_COUNT);
                let attempt_timeout = self.attempt_timeout();
                attempt_timeout
                    .saturating_mul(max_count)
                    .saturating_mul(BUDGET_MULTIPLIER)
                    .saturating_add(attempt_timeout)
            }
        }
    }

    pub fn ping_program(&self) -> String {
        self.probe_config()
            .ping_program
            .unwrap_or_else(|| DEFAULT_PING_PROGRAM.to_string())
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.probe_config().policy.unwrap_or_default()
    }
}
