//! Runtime settings for background projection workers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for [`ProjectionWorker`](crate::worker::ProjectionWorker).
///
/// Durations are (de)serialized as milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Delay before resubscribing when the live stream ends.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Delay before retrying after a failed event.
    #[serde(with = "millis")]
    pub retry_backoff: Duration,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl ProjectionConfig {
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Serde adapter for durations stored as whole milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ProjectionConfig =
            serde_json::from_value(serde_json::json!({ "retry_backoff": 250 })).unwrap();
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.poll_interval, ProjectionConfig::default().poll_interval);
    }

    #[test]
    fn serializes_as_millis() {
        let config = ProjectionConfig::default().poll_interval(Duration::from_secs(2));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], 2000);
    }
}
