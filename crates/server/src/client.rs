//! Client address and scheme detection behind reverse proxies.
//!
//! By default `X-Forwarded-For`, `X-Real-IP` and `X-Forwarded-Proto` are NOT
//! trusted. Configure `server.trusted_proxies` to honour them:
//!
//! - Empty list (default): only the direct connection is used
//! - List of IPs/CIDRs: headers trusted only when the peer is in the list
//! - `["*"]`: trust headers from every peer (development only)

use axum::http::HeaderMap;
use imagegate_core::sanitize_ip;
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};

/// A parsed trusted proxy entry (either an IP or CIDR range).
#[derive(Clone, Debug)]
pub enum TrustedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

/// Which peers may speak for the client through forwarding headers.
#[derive(Clone, Debug, Default)]
pub enum TrustedProxies {
    /// Never trust forwarded headers.
    #[default]
    None,
    /// Trust headers from all sources.
    All,
    /// Trust headers only from specific IPs/CIDRs.
    List(Vec<TrustedEntry>),
}

impl TrustedProxies {
    pub fn from_config(proxies: &[String]) -> Self {
        if proxies.is_empty() {
            Self::None
        } else if proxies.len() == 1 && proxies[0] == "*" {
            Self::All
        } else {
            let entries = proxies
                .iter()
                .filter_map(|p| {
                    if p.contains('/') {
                        match p.parse::<IpNet>() {
                            Ok(net) => Some(TrustedEntry::Cidr(net)),
                            Err(e) => {
                                tracing::warn!("Invalid CIDR in trusted_proxies: '{}': {}", p, e);
                                None
                            }
                        }
                    } else {
                        match p.parse::<IpAddr>() {
                            Ok(ip) => Some(TrustedEntry::Ip(ip)),
                            Err(e) => {
                                tracing::warn!("Invalid IP in trusted_proxies: '{}': {}", p, e);
                                None
                            }
                        }
                    }
                })
                .collect();
            Self::List(entries)
        }
    }

    /// Check if the given connection IP is a trusted proxy.
    fn is_trusted(&self, peer: Option<IpAddr>) -> bool {
        match (self, peer) {
            (Self::None, _) => false,
            (Self::All, _) => true,
            // Without a peer address a listed proxy cannot be verified.
            (Self::List(_), None) => false,
            (Self::List(entries), Some(ip)) => entries.iter().any(|entry| match entry {
                TrustedEntry::Ip(trusted) => *trusted == ip,
                TrustedEntry::Cidr(network) => network.contains(&ip),
            }),
        }
    }

    /// Sanitized client address: the forwarded one when the peer is
    /// trusted, otherwise the peer itself, otherwise `"unknown"`.
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.is_trusted(peer.map(|p| p.ip()))
            && let Some(forwarded) = forwarded_ip(headers)
        {
            return sanitize_ip(forwarded);
        }
        match peer {
            Some(addr) => addr.ip().to_string(),
            None => sanitize_ip(""),
        }
    }

    /// `https` when a trusted proxy says the client connection was TLS.
    pub fn scheme(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> &'static str {
        let forwarded_https = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("https"));

        if forwarded_https && self.is_trusted(peer.map(|p| p.ip())) {
            "https"
        } else {
            "http"
        }
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<&str> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(s) = forwarded.to_str()
    {
        return Some(s);
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}
