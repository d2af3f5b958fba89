//! Static catalog of inbound protocols and engine support
//!
//! Engine support is a pure lookup: sing-box accepts every protocol,
//! Xray accepts everything except the sing-box-only set.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::CoreKind;

/// Inbound protocol identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
    #[serde(rename = "dokodemo-door")]
    DokodemoDoor,
    Socks,
    Http,
    Wireguard,
    Hysteria,
    Hysteria2,
    Tuic,
    Naive,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::DokodemoDoor => "dokodemo-door",
            Protocol::Socks => "socks",
            Protocol::Http => "http",
            Protocol::Wireguard => "wireguard",
            Protocol::Hysteria => "hysteria",
            Protocol::Hysteria2 => "hysteria2",
            Protocol::Tuic => "tuic",
            Protocol::Naive => "naive",
        }
    }

    /// Whether only sing-box can serve this protocol
    pub fn is_sing_box_only(&self) -> bool {
        matches!(
            self,
            Protocol::Hysteria | Protocol::Hysteria2 | Protocol::Tuic | Protocol::Naive
        )
    }

    /// Whether the given core kind can serve this protocol
    pub fn supported_by(&self, kind: CoreKind) -> bool {
        match kind {
            CoreKind::Xray => !self.is_sing_box_only(),
            CoreKind::SingBox => true,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vmess" => Ok(Protocol::Vmess),
            "vless" => Ok(Protocol::Vless),
            "trojan" => Ok(Protocol::Trojan),
            "shadowsocks" => Ok(Protocol::Shadowsocks),
            "dokodemo-door" => Ok(Protocol::DokodemoDoor),
            "socks" => Ok(Protocol::Socks),
            "http" => Ok(Protocol::Http),
            "wireguard" => Ok(Protocol::Wireguard),
            "hysteria" => Ok(Protocol::Hysteria),
            "hysteria2" => Ok(Protocol::Hysteria2),
            "tuic" => Ok(Protocol::Tuic),
            "naive" => Ok(Protocol::Naive),
            other => Err(Error::Config(format!("unknown protocol: {}", other))),
        }
    }
}
