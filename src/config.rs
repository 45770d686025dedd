//! Configuration for a broadcast node.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// Dissemination policy, selected once when the node is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every client broadcast is sent to every other node. No anti-entropy.
    Direct,

    /// Every client broadcast is forwarded once to the full peer list, and a
    /// ring anti-entropy task closes whatever gaps lost forwards leave.
    ///
    /// A value reaches a node at ring distance `d` within `d` sync intervals
    /// even if every forward is lost.
    #[default]
    #[serde(rename = "ring", alias = "ring_deferred")]
    RingDeferred,
}

impl Strategy {
    /// Whether this policy needs the anti-entropy task.
    pub const fn needs_sync(&self) -> bool {
        matches!(self, Strategy::RingDeferred)
    }

    /// Short name used in logs and on the command line.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::RingDeferred => "ring",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Strategy::Direct),
            "ring" | "ring_deferred" | "ring-deferred" => Ok(Strategy::RingDeferred),
            other => Err(format!(
                "unknown strategy {other:?} (expected \"direct\" or \"ring\")"
            )),
        }
    }
}

/// Configuration options for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Dissemination policy.
    ///
    /// Default: [`Strategy::RingDeferred`]
    pub strategy: Strategy,

    /// Interval between anti-entropy rounds with the ring successor.
    ///
    /// Only used by [`Strategy::RingDeferred`].
    ///
    /// Default: 1s
    #[serde(with = "millis")]
    pub sync_interval: Duration,

    /// How long the stdio transport waits for an RPC reply before giving up.
    ///
    /// A failed sync round is simply retried on the next tick.
    ///
    /// Default: 1s
    #[serde(with = "millis")]
    pub rpc_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::RingDeferred,
            sync_interval: Duration::from_millis(1000),
            rpc_timeout: Duration::from_millis(1000),
        }
    }
}

impl NodeConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct fan-out without anti-entropy.
    pub fn direct() -> Self {
        Self {
            strategy: Strategy::Direct,
            ..Self::default()
        }
    }

    /// Forward-once plus ring anti-entropy.
    pub fn ring() -> Self {
        Self::default()
    }

    /// Set the dissemination strategy (builder pattern).
    pub const fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the anti-entropy interval (builder pattern).
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the RPC timeout used by the stdio transport (builder pattern).
    pub const fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_u64(duration.as_millis() as u64)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let ms: u64 = s
                .trim_end_matches("ms")
                .parse()
                .map_err(serde::de::Error::custom)?;
            Ok(Duration::from_millis(ms))
        } else {
            let ms = u64::deserialize(deserializer)?;
            Ok(Duration::from_millis(ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.strategy, Strategy::RingDeferred);
        assert!(config.strategy.needs_sync());
        assert_eq!(config.sync_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_pattern() {
        let config = NodeConfig::new()
            .with_strategy(Strategy::Direct)
            .with_sync_interval(Duration::from_millis(200))
            .with_rpc_timeout(Duration::from_millis(300));

        assert_eq!(config.strategy, Strategy::Direct);
        assert!(!config.strategy.needs_sync());
        assert_eq!(config.sync_interval, Duration::from_millis(200));
        assert_eq!(config.rpc_timeout, Duration::from_millis(300));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("direct".parse::<Strategy>().unwrap(), Strategy::Direct);
        assert_eq!("ring".parse::<Strategy>().unwrap(), Strategy::RingDeferred);
        assert!("flood".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_strategy_serde_name_matches_display() {
        let json = serde_json::to_string(&Strategy::RingDeferred).unwrap();
        assert_eq!(json, format!("\"{}\"", Strategy::RingDeferred));

        let old: Strategy = serde_json::from_str("\"ring_deferred\"").unwrap();
        assert_eq!(old, Strategy::RingDeferred);
        let direct: Strategy = serde_json::from_str("\"direct\"").unwrap();
        assert_eq!(direct.to_string(), "direct");
    }

    #[test]
    fn test_serde_durations() {
        let config = NodeConfig::direct().with_sync_interval(Duration::from_millis(250));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"250ms\""));
        assert!(json.contains("\"direct\""));

        let back: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
