//! Header handling between client and upstream.

use std::net::IpAddr;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

/// Header name for request ID.
pub static HEADER_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Header name for the forwarded client chain.
pub static HEADER_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Hop-by-hop headers (RFC 9110 section 7.6.1), never forwarded in either direction.
pub static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Check if a header is hop-by-hop.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Copy headers for forwarding, dropping hop-by-hop headers and any header
/// named in `Connection`.
pub fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let connection_listed: Vec<String> = headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || connection_listed.iter().any(|t| t == name.as_str()) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

/// Headers for the outbound request: [`filter_headers`] minus `host` and
/// `content-length`, which the HTTP client sets for the upstream.
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = filter_headers(headers);
    filtered.remove(http::header::HOST);
    filtered.remove(http::header::CONTENT_LENGTH);
    filtered
}

/// Append `peer` to `X-Forwarded-For`, keeping any existing chain.
///
/// Repeated `X-Forwarded-For` lines are folded into one, in order.
pub fn append_forwarded_for(headers: &mut HeaderMap, peer: IpAddr) {
    let mut hops: Vec<String> = headers
        .get_all(&HEADER_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect();
    hops.push(peer.to_string());
    let chain = hops.join(", ");
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(HEADER_FORWARDED_FOR.clone(), value);
    }
}

/// The client's request ID if usable, otherwise a fresh UUIDv7.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(&HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map_or_else(|| Uuid::now_v7().to_string(), String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-secret-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("host", HeaderValue::from_static("gateway:8080"));
        headers.insert("content-length", HeaderValue::from_static("12"));
        headers.insert("x-secret-hop", HeaderValue::from_static("1"));
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let filtered = filter_request_headers(&headers);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.get("authorization").unwrap(), "Bearer abc");
        assert_eq!(filtered.get("content-type").unwrap(), "application/json");

        let response = filter_headers(&headers);
        assert_eq!(response.get("content-length").unwrap(), "12");
        assert!(response.get("transfer-encoding").is_none());
        assert!(response.get("x-secret-hop").is_none());
    }

    #[test]
    fn test_filter_keeps_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let filtered = filter_headers(&headers);
        assert_eq!(filtered.get_all("accept").iter().count(), 2);
    }

    #[test]
    fn test_forwarded_for() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1".parse().unwrap());
        assert_eq!(headers.get(&HEADER_FORWARDED_FOR).unwrap(), "10.0.0.1");

        append_forwarded_for(&mut headers, "::1".parse().unwrap());
        assert_eq!(headers.get(&HEADER_FORWARDED_FOR).unwrap(), "10.0.0.1, ::1");
    }

    #[test]
    fn test_forwarded_for_folds_repeated_lines() {
        let mut headers = HeaderMap::new();
        headers.append(&HEADER_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));
        headers.append(&HEADER_FORWARDED_FOR, HeaderValue::from_static(" "));
        headers.append(
            &HEADER_FORWARDED_FOR,
            HeaderValue::from_static("198.51.100.2, 192.0.2.9"),
        );

        append_forwarded_for(&mut headers, "10.0.0.1".parse().unwrap());

        assert_eq!(headers.get_all(&HEADER_FORWARDED_FOR).iter().count(), 1);
        assert_eq!(
            headers.get(&HEADER_FORWARDED_FOR).unwrap(),
            "203.0.113.7, 198.51.100.2, 192.0.2.9, 10.0.0.1"
        );
    }

    #[test]
    fn test_request_id() {
        let mut headers = HeaderMap::new();
        let generated = request_id(&headers);
        assert_eq!(Uuid::parse_str(&generated).unwrap().get_version_num(), 7);

        headers.insert(&HEADER_REQUEST_ID, HeaderValue::from_static("abc-123"));
        assert_eq!(request_id(&headers), "abc-123");

        headers.insert(&HEADER_REQUEST_ID, HeaderValue::from_static("  "));
        assert_ne!(request_id(&headers), "  ");
    }
}
