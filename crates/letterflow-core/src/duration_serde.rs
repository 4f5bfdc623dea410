//! Human-readable `Duration` fields for configuration files.
//!
//! Use with `#[serde(with = "letterflow_core::duration_serde")]`. Accepts
//! strings such as `"750ms"`, `"30s"` or `"5m"`, and plain integers as
//! milliseconds.

use serde::{de, Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(de::Error::custom),
    }
}
