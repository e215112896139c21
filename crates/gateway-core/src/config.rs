use serde::{Deserialize, Serialize};

/// Mutable, persisted, hot-read on login. Every field is independent of the
/// others — see the component design for what each one gates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_true")]
    pub allow_connect: bool,
    #[serde(default = "default_true")]
    pub sublist_send: bool,
    #[serde(default = "default_true")]
    pub store: bool,
    /// Reserved cross-device fanout flag; read but never acted on (see
    /// DESIGN.md for why it is kept rather than dropped).
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// Idle-read timeout, minutes.
    #[serde(default = "default_read_deadline")]
    pub read_deadline_minutes: u32,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_read_deadline() -> u32 {
    10
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            allow_connect: true,
            sublist_send: true,
            store: true,
            broadcast: false,
            log_level: LogLevel::Info,
            read_deadline_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let cfg: DeviceConfig = serde_json::from_str(r#"{"allow_connect": false}"#).unwrap();
        assert!(!cfg.allow_connect);
        assert!(cfg.sublist_send);
        assert!(cfg.store);
        assert!(!cfg.broadcast);
        assert_eq!(cfg.read_deadline_minutes, 10);
    }

    #[test]
    fn default_matches_the_documented_baseline() {
        let cfg = DeviceConfig::default();
        assert!(cfg.allow_connect);
        assert_eq!(cfg.log_level, LogLevel::Info);
    }
}
