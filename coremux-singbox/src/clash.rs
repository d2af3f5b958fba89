//! Client for sing-box's Clash-compatible management API
//!
//! sing-box exposes no per-tag counters, so the collector walks the live
//! connection list and sums per-connection byte counters grouped by the
//! inbound tag in each connection's metadata. The result reflects only
//! currently-open connections, not a lifetime total across connection
//! churn.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use coremux_core::{Error, InboundTraffic, Result, Traffic};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine-wide throughput totals
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TrafficTotals {
    pub up: i64,
    pub down: i64,
}

/// Response of `GET /connections`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsSnapshot {
    #[serde(default)]
    pub download_total: i64,
    #[serde(default)]
    pub upload_total: i64,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// One live connection
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    #[serde(default)]
    pub upload: i64,
    #[serde(default)]
    pub download: i64,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub rule: String,
    #[serde(default)]
    pub metadata: ConnectionMetadata,
}

/// Routing metadata attached to a connection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    #[serde(default)]
    pub network: String,
    #[serde(default, rename = "sourceIP")]
    pub source_ip: String,
    #[serde(default, rename = "destinationIP")]
    pub destination_ip: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub inbound_tag: String,
}

/// Clash API client bound to one running sing-box instance
#[derive(Debug, Clone)]
pub struct ClashApiClient {
    base_url: String,
    secret: String,
    http: reqwest::Client,
}

impl ClashApiClient {
    pub fn new(port: u16, secret: impl Into<String>) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            secret: secret.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::Response> {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .timeout(CALL_TIMEOUT);
        if !self.secret.is_empty() {
            builder = builder.bearer_auth(&self.secret);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Stats(format!("clash api request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Stats(format!(
                "clash api returned {} for {}",
                response.status(),
                path
            )));
        }
        Ok(response)
    }

    /// Current engine-wide throughput
    pub async fn traffic(&self) -> Result<TrafficTotals> {
        self.request(reqwest::Method::GET, "/traffic")
            .await?
            .json()
            .await
            .map_err(|e| Error::Stats(format!("invalid traffic response: {}", e)))
    }

    /// All live connections with their byte counters
    pub async fn connections(&self) -> Result<ConnectionsSnapshot> {
        self.request(reqwest::Method::GET, "/connections")
            .await?
            .json()
            .await
            .map_err(|e| Error::Stats(format!("invalid connections response: {}", e)))
    }

    pub async fn close_connection(&self, id: &str) -> Result<()> {
        self.request(reqwest::Method::DELETE, &format!("/connections/{}", id))
            .await?;
        Ok(())
    }

    pub async fn close_all_connections(&self) -> Result<()> {
        self.request(reqwest::Method::DELETE, "/connections").await?;
        Ok(())
    }
}

/// Sum per-connection counters grouped by inbound tag
///
/// Connections whose metadata carries no tag fall into "default".
pub fn aggregate_by_tag(connections: &[Connection]) -> Vec<InboundTraffic> {
    let mut by_tag: BTreeMap<&str, Traffic> = BTreeMap::new();
    for connection in connections {
        let tag = match connection.metadata.inbound_tag.as_str() {
            "" => "default",
            tag => tag,
        };
        let entry = by_tag.entry(tag).or_default();
        entry.up += connection.upload;
        entry.down += connection.download;
    }
    by_tag
        .into_iter()
        .map(|(tag, traffic)| InboundTraffic {
            tag: tag.to_string(),
            traffic,
        })
        .collect()
}
