use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Derive the client IP for rate limiting, geo lookup and logging.
///
/// Precedence: `X-Real-IP`, then the first hop of `X-Forwarded-For`, then
/// the transport peer address. Header authenticity is not validated here;
/// the service is assumed to sit behind a proxy that owns these headers.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(ip) = header_value(headers, "x-real-ip") {
        return ip;
    }

    if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    peer.ip().to_string()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "203.0.113.7:52100".parse().unwrap()
    }

    #[test]
    fn real_ip_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("8.8.8.8"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.1.1.1, 2.2.2.2"),
        );
        assert_eq!(client_ip(&headers, peer()), "8.8.8.8");
    }

    #[test]
    fn forwarded_for_uses_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.1.1.1, 2.2.2.2, 3.3.3.3"),
        );
        assert_eq!(client_ip(&headers, peer()), "1.1.1.1");
    }

    #[test]
    fn falls_back_to_peer_address_without_port() {
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "203.0.113.7");
    }

    #[test]
    fn blank_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("  "));
        assert_eq!(client_ip(&headers, peer()), "203.0.113.7");
    }
}
