//! Client for the Xray stats bridge
//!
//! The bridge listens on loopback next to the engine's API inbound and
//! speaks newline-delimited JSON: one request line in, one response line
//! out per connection. Counter names follow Xray's convention,
//! `inbound>>>{tag}>>>traffic>>>{uplink|downlink}` and
//! `user>>>{email}>>>traffic>>>{uplink|downlink}`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use coremux_core::{Error, InboundTraffic, Result, Traffic};

const CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Request messages sent to the stats bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatsRequest {
    /// Query counters matching a name pattern, optionally resetting them
    #[serde(rename = "query")]
    Query { pattern: String, reset: bool },

    /// Point lookup of a single counter
    #[serde(rename = "get")]
    Get { name: String },
}

/// Response messages from the stats bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatsResponse {
    /// Counters matching a query
    #[serde(rename = "counters")]
    Counters { counters: Vec<Counter> },

    /// Point lookup result; absent when the counter does not exist
    #[serde(rename = "counter")]
    Counter { counter: Option<Counter> },

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },
}

/// One named byte counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    pub name: String,
    pub value: i64,
}

/// Stats bridge client; connects per call, so clones are cheap
#[derive(Debug, Clone)]
pub struct StatsClient {
    addr: SocketAddr,
}

impl StatsClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Check that the bridge accepts connections
    pub async fn probe(&self) -> Result<()> {
        let connect = TcpStream::connect(self.addr);
        tokio::time::timeout(CALL_TIMEOUT, connect)
            .await
            .map_err(|_| Error::Timeout(format!("connecting to stats bridge at {}", self.addr)))?
            .map_err(|e| Error::Stats(format!("stats bridge unreachable at {}: {}", self.addr, e)))?;
        Ok(())
    }

    /// Send a request and read the single response line
    pub async fn request(&self, request: &StatsRequest) -> Result<StatsResponse> {
        let call = async {
            let stream = TcpStream::connect(self.addr)
                .await
                .map_err(|e| Error::Stats(format!("connect to {}: {}", self.addr, e)))?;
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);

            let mut request_json = serde_json::to_string(request)?;
            request_json.push('\n');
            writer
                .write_all(request_json.as_bytes())
                .await
                .map_err(|e| Error::Stats(format!("send request: {}", e)))?;

            let mut line = String::new();
            reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Stats(format!("read response: {}", e)))?;
            serde_json::from_str(line.trim())
                .map_err(|e| Error::Stats(format!("invalid response: {}", e)))
        };

        tokio::time::timeout(CALL_TIMEOUT, call)
            .await
            .map_err(|_| Error::Timeout("stats bridge call".into()))?
    }

    /// Query counters by name pattern
    pub async fn query(&self, pattern: &str, reset: bool) -> Result<Vec<Counter>> {
        let request = StatsRequest::Query {
            pattern: pattern.to_string(),
            reset,
        };
        match self.request(&request).await? {
            StatsResponse::Counters { counters } => Ok(counters),
            StatsResponse::Error { message } => Err(Error::Stats(message)),
            _ => Err(Error::Stats("unexpected response to query".into())),
        }
    }

    /// Look up one counter; `None` when the engine never created it
    pub async fn get(&self, name: &str) -> Result<Option<i64>> {
        let request = StatsRequest::Get {
            name: name.to_string(),
        };
        match self.request(&request).await? {
            StatsResponse::Counter { counter } => Ok(counter.map(|c| c.value)),
            StatsResponse::Error { message } => Err(Error::Stats(message)),
            _ => Err(Error::Stats("unexpected response to get".into())),
        }
    }
}

/// Traffic direction parsed from a counter name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Uplink,
    Downlink,
}

/// Parse `scope>>>id>>>traffic>>>direction` into its parts
///
/// Returns `None` for any name that does not follow the convention;
/// aggregation skips those silently.
pub fn parse_counter_name(name: &str) -> Option<(&str, &str, Direction)> {
    let mut parts = name.split(">>>");
    let scope = parts.next()?;
    let id = parts.next()?;
    if parts.next()? != "traffic" {
        return None;
    }
    let direction = match parts.next()? {
        "uplink" => Direction::Uplink,
        "downlink" => Direction::Downlink,
        _ => return None,
    };
    if parts.next().is_some() || id.is_empty() {
        return None;
    }
    Some((scope, id, direction))
}

/// Group inbound counters by tag
pub fn aggregate_inbound(counters: &[Counter]) -> Vec<InboundTraffic> {
    let mut by_tag: BTreeMap<&str, Traffic> = BTreeMap::new();
    for counter in counters {
        let Some(("inbound", tag, direction)) = parse_counter_name(&counter.name) else {
            continue;
        };
        let entry = by_tag.entry(tag).or_default();
        match direction {
            Direction::Uplink => entry.up += counter.value,
            Direction::Downlink => entry.down += counter.value,
        }
    }
    by_tag
        .into_iter()
        .map(|(tag, traffic)| InboundTraffic {
            tag: tag.to_string(),
            traffic,
        })
        .collect()
}
