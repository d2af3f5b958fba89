//! Generic inbound description consumed by engine config builders
//!
//! This is the single canonical shape the persistence layer produces.
//! Each engine's builder translates a list of these into its native
//! configuration document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::Protocol;

/// Engine-neutral description of one listening proxy endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundConfig {
    pub id: i32,

    /// Unique per engine instance; aggregation key for traffic stats
    pub tag: String,

    pub protocol: Protocol,

    pub listen: String,

    pub port: u16,

    /// Protocol-specific settings document (clients, method, ...)
    #[serde(default)]
    pub settings: Map<String, Value>,

    /// Transport/TLS settings document
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub stream_settings: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sniffing: Option<SniffingConfig>,

    pub enable: bool,
}

/// Traffic sniffing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SniffingConfig {
    pub enabled: bool,
    #[serde(default)]
    pub dest_override: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_panel_shaped_json() {
        let json = r#"{
            "id": 1,
            "tag": "inbound-443",
            "protocol": "vless",
            "listen": "0.0.0.0",
            "port": 443,
            "settings": {"clients": [{"id": "abc"}]},
            "streamSettings": {"security": "tls"},
            "sniffing": {"enabled": true, "destOverride": ["http", "tls"]},
            "enable": true
        }"#;

        let inbound: InboundConfig = serde_json::from_str(json).unwrap();
        assert_eq!(inbound.protocol, Protocol::Vless);
        assert_eq!(inbound.port, 443);
        assert!(inbound.settings.contains_key("clients"));
        assert_eq!(
            inbound.stream_settings.get("security").and_then(Value::as_str),
            Some("tls")
        );
        assert_eq!(inbound.sniffing.unwrap().dest_override, vec!["http", "tls"]);
    }

    #[test]
    fn settings_default_to_empty() {
        let json = r#"{
            "id": 2,
            "tag": "plain",
            "protocol": "socks",
            "listen": "127.0.0.1",
            "port": 1080,
            "enable": false
        }"#;

        let inbound: InboundConfig = serde_json::from_str(json).unwrap();
        assert!(inbound.settings.is_empty());
        assert!(inbound.stream_settings.is_empty());
        assert!(inbound.sniffing.is_none());
        assert!(!inbound.enable);
    }
}
