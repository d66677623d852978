use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Connection details passed through to actions untouched.
///
/// The transport layer owns their meaning, the scheduler only hands them to
/// every action it executes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub server: String,
    pub port: Option<u16>,
    pub security: bool,
    #[serde(rename = "allowuntrusted")]
    pub allow_untrusted: bool,
    pub headers: HashMap<String, String>,
}

/// Serde adapter for human readable durations such as `"250ms"` or `"1m 30s"`.
pub(crate) mod duration_str {
    use super::*;
    use serde::{Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}
