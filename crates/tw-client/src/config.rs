//! Configuration types for the TW client

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default number of rows fetched per result-set batch
    pub fetch_size: i64,

    /// Default server-side time limit (seconds) attached to queries and
    /// batch fetches; `None` leaves the server unbounded.
    pub timelimit: Option<i64>,

    /// Timeout configurations
    pub timeouts: TimeoutConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fetch_size: 10,
            timelimit: None,
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection timeout
    #[serde(with = "duration_serde")]
    pub connect: Duration,

    /// Local deadline on each outbound call; `None` waits indefinitely.
    ///
    /// Expiry surfaces a timeout to the caller without cancelling the
    /// server-side work (there is no in-band cancel on a JSON-RPC id).
    #[serde(with = "opt_duration_serde")]
    pub call: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            call: None,
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.fetch_size, 10);
        assert_eq!(config.timelimit, None);
        assert_eq!(config.timeouts.connect, Duration::from_secs(30));
        assert!(config.timeouts.call.is_none());
    }

    #[test]
    fn config_round_trip() {
        let mut config = ClientConfig::default();
        config.fetch_size = 500;
        config.timeouts.call = Some(Duration::from_secs(15));

        let json = serde_json::to_string(&config).unwrap();
        let parsed: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.fetch_size, 500);
        assert_eq!(parsed.timeouts.call, Some(Duration::from_secs(15)));
    }
}
