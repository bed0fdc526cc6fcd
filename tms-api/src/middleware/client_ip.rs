//! Client address resolution shared by the auth, rate-limit and request-log
//! layers.

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

const UNKNOWN: &str = "unknown";

/// Resolve the caller's address.
///
/// The first `X-Forwarded-For` entry wins when it is a valid IPv4/IPv6
/// literal. Otherwise the observed connection address is used, and
/// `"unknown"` when neither is available.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|first| first.parse::<IpAddr>().ok());

    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => UNKNOWN.to_string(),
    }
}

/// [`client_ip`] for a request served with `into_make_service_with_connect_info`.
pub fn request_ip(request: &Request) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_ip(request.headers(), peer)
}

pub fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(xff: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_str(xff).unwrap());
        h
    }

    #[test]
    fn test_forwarded_first_entry_wins() {
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        assert_eq!(client_ip(&headers(" 203.0.113.7 , 10.0.0.1"), Some(peer)), "203.0.113.7");
        assert_eq!(client_ip(&headers("2001:db8::1"), None), "2001:db8::1");
    }

    #[test]
    fn test_invalid_forwarded_falls_back() {
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        assert_eq!(client_ip(&headers("not-an-ip"), Some(peer)), "10.0.0.9");
        assert_eq!(client_ip(&headers("not-an-ip"), None), "unknown");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }
}
