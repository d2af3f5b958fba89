//! Shared data model for proxy cores

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identifies a supported proxy engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoreKind {
    #[serde(rename = "xray")]
    Xray,
    #[serde(rename = "sing-box")]
    SingBox,
}

impl CoreKind {
    /// Stable identifier used in configuration files and map keys
    pub fn as_str(&self) -> &'static str {
        match self {
            CoreKind::Xray => "xray",
            CoreKind::SingBox => "sing-box",
        }
    }
}

impl std::fmt::Display for CoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run state of a core adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreState {
    Stopped,
    Running,
    Error,
}

impl std::fmt::Display for CoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CoreState::Stopped => "stopped",
            CoreState::Running => "running",
            CoreState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Byte counters for one statistics scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traffic {
    pub up: i64,
    pub down: i64,
}

/// Traffic aggregated for one inbound tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundTraffic {
    pub tag: String,
    pub traffic: Traffic,
}

/// Traffic recorded for one client identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientTraffic {
    pub email: String,
    pub traffic: Traffic,
}

/// Point-in-time snapshot of a core adapter
///
/// Computed on demand from adapter state; `uptime_secs` and `start_at`
/// are only populated while the core is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub state: CoreState,
    pub version: String,
    pub uptime_secs: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<SystemTime>,
}

impl Status {
    /// Snapshot for a core that has never been started
    pub fn stopped() -> Self {
        Self {
            state: CoreState::Stopped,
            version: String::new(),
            uptime_secs: 0,
            error_msg: String::new(),
            start_at: None,
        }
    }
}
