//! Cluster configuration consumed by the storage plane.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Durations are stored on the wire as integer milliseconds.
mod duration_ms {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

// ----------------------------------------------------------------------------

/// Feature flags (a bitfield in the cluster config).
pub mod feat {
    /// Keep the source object after its migration is acknowledged.
    pub const DONT_DELETE_WHEN_REBALANCING: u64 = 1 << 0;

    /// Skip the post-abort grace sleep after force-stopping activities.
    pub const NO_ABORT_GRACE: u64 = 1 << 1;
}

// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConf {
    /// Housekeeping period and cache-entry age threshold.
    #[serde(with = "duration_ms")]
    pub object_md: Duration,

    /// Upper bound for any one object transfer.
    #[serde(with = "duration_ms")]
    pub send_file: Duration,

    #[serde(with = "duration_ms")]
    pub max_keepalive: Duration,
}

impl Default for TimeoutConf {
    fn default() -> Self {
        Self {
            object_md: Duration::from_secs(2 * 60 * 60),
            send_file: Duration::from_secs(5 * 60),
            max_keepalive: Duration::from_secs(4),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceConf {
    pub enabled: bool,

    /// Max wait for a usable cluster map on the receive path.
    #[serde(with = "duration_ms")]
    pub dest_retry_time: Duration,
}

impl Default for RebalanceConf {
    fn default() -> Self {
        Self {
            enabled: true,
            dest_retry_time: Duration::from_secs(120),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConf {
    pub enabled: bool,
    pub copies: usize,

    /// Device-utilization percentage above which mirroring yields to
    /// client I/O.
    pub util_threshold: i64,
}

impl Default for MirrorConf {
    fn default() -> Self {
        Self {
            enabled: false,
            copies: 2,
            util_threshold: 20,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcConf {
    pub enabled: bool,
    pub data_slices: usize,
    pub parity_slices: usize,

    /// Objects at or below this size are replicated instead of sliced.
    pub obj_size_limit: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcacheConf {
    /// Whether `load-lom-cache` activities may be renewed at all.
    pub load_enabled: bool,
}

// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timeout: TimeoutConf,
    #[serde(default)]
    pub rebalance: RebalanceConf,
    #[serde(default)]
    pub mirror: MirrorConf,
    #[serde(default)]
    pub ec: EcConf,
    #[serde(default)]
    pub lcache: LcacheConf,

    /// Bitfield of [`feat`] flags.
    #[serde(default)]
    pub features: u64,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(std::io::Error::other)
    }

    pub fn feature(&self, flag: u64) -> bool {
        self.features & flag != 0
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let mut config = Config::default();
        config.features = feat::DONT_DELETE_WHEN_REBALANCING;
        config.timeout.object_md = Duration::from_secs(60);

        let text = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
        assert!(back.feature(feat::DONT_DELETE_WHEN_REBALANCING));
        assert!(!back.feature(feat::NO_ABORT_GRACE));
    }

    #[test]
    fn missing_sections_default() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeout.object_md, Duration::from_secs(7200));
    }
}
