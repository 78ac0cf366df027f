//! Configuration: backend connection + polling cadence.

use serde::{Deserialize, Serialize};

use crate::app::PollerConfig;
use crate::impls::ClientConfig;

/// Everything needed to wire a client session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathwayConfig {
    pub client: ClientConfig,
    pub poller: PollerConfig,
}

impl PathwayConfig {
    /// Parse from JSON, filling unspecified fields with defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// `Duration` as integer milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
