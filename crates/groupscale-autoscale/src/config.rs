//! Catalog and convergence configuration.
//!
//! Deserializable from TOML; durations are written as `"500ms"`, `"30s"`,
//! `"5m"`, or a bare number of seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BootError;

/// Prefix given to the names of instances created by the autoscaler.
pub const DEFAULT_SERVER_NAME_PREFIX: &str = "auto.";

/// How the convergence poller waits for the provider to catch up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Delay between two observations (default: 1s).
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Total budget before giving up (default: 30s).
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ConvergenceConfig {
    /// Both durations must be non-zero; a zero interval would poll the
    /// provider without pause.
    pub fn validate(&self) -> Result<(), BootError> {
        if self.interval.is_zero() {
            return Err(BootError::ZeroConvergence("interval"));
        }
        if self.timeout.is_zero() {
            return Err(BootError::ZeroConvergence("timeout"));
        }
        Ok(())
    }
}

/// What to do when two members report different usable values for the
/// same launch attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The group gets no template and is left out of discovery.
    #[default]
    Reject,
    /// Keep the first value seen and log the disagreement.
    KeepFirst,
}

/// Configuration of a discovery catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Fully qualified internal domain name of the cluster. Scaling groups
    /// are named `<anything>.<cluster_name>`; the parent group is named
    /// exactly `<cluster_name>`.
    pub cluster_name: String,
    #[serde(default = "default_server_name_prefix")]
    pub server_name_prefix: String,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
}

impl CatalogConfig {
    pub fn new(cluster_name: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            server_name_prefix: default_server_name_prefix(),
            conflict_policy: ConflictPolicy::default(),
            convergence: ConvergenceConfig::default(),
        }
    }

    pub fn with_convergence(self, convergence: ConvergenceConfig) -> Self {
        Self {
            convergence,
            ..self
        }
    }

    pub fn with_conflict_policy(self, conflict_policy: ConflictPolicy) -> Self {
        Self {
            conflict_policy,
            ..self
        }
    }

    /// Reject configurations the catalog cannot run with.
    pub fn validate(&self) -> Result<(), BootError> {
        if self.cluster_name.trim().is_empty() {
            return Err(BootError::MissingClusterName);
        }
        self.convergence.validate()
    }

    /// Name suffix that marks a group as belonging to this cluster.
    pub fn cluster_suffix(&self) -> String {
        format!(".{}", self.cluster_name)
    }
}

fn default_server_name_prefix() -> String {
    DEFAULT_SERVER_NAME_PREFIX.to_string()
}

/// Parse a duration string like "500ms", "30s", "5m" or "30".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Format a duration the way `parse_duration` reads it back.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid duration {raw:?}")))
    }
}
