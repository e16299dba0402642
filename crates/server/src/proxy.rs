//! Plain HTTP reverse proxy
//!
//! Forwards a request to the route's upstream with the origin rewritten so
//! the backend treats it as same-origin, and streams the response back.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use marimo_dev_common::{Error, ProxyRoute, Result};

/// Largest request body buffered before forwarding
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct HttpProxy {
    client: reqwest::Client,
}

impl HttpProxy {
    pub fn new() -> Result<Self> {
        // Redirects go back to the browser untouched.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {}", e)))?;
        Ok(Self { client })
    }

    /// Forward `req` to the upstream of `route`
    pub async fn forward(&self, route: &ProxyRoute, req: Request) -> Response {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = route.upstream_url(path_and_query);

        let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Rejecting request body for {}: {}", url, e);
                return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response();
            }
        };

        debug!("Proxy {} {} -> {}", parts.method, path_and_query, url);

        let upstream = self
            .client
            .request(parts.method.clone(), &url)
            .headers(upstream_request_headers(&parts.headers, route))
            .body(body)
            .send()
            .await;

        match upstream {
            Ok(resp) => {
                let status = resp.status();
                let headers = downstream_response_headers(resp.headers());
                let mut response = Response::new(Body::from_stream(resp.bytes_stream()));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Err(e) => {
                warn!("Upstream request to {} failed: {}", url, e);
                (
                    StatusCode::BAD_GATEWAY,
                    format!("marimo server unreachable at {}: {}", route.origin(), e),
                )
                    .into_response()
            }
        }
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// End-to-end request headers with `Origin` pointed at the upstream.
///
/// `Host` and `Content-Length` are dropped; the client sets them for the new request.
pub fn upstream_request_headers(incoming: &HeaderMap, route: &ProxyRoute) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len());
    for (name, value) in incoming {
        if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Ok(origin) = HeaderValue::from_str(&route.origin()) {
        headers.insert(header::ORIGIN, origin);
    }
    headers
}

fn downstream_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers_rewrite_origin_and_drop_hop_by_hop() {
        let route = ProxyRoute::http("/api", "http://127.0.0.1:2718");
        let mut incoming = HeaderMap::new();
        incoming.insert(header::HOST, HeaderValue::from_static("localhost:3000"));
        incoming.insert(header::ORIGIN, HeaderValue::from_static("http://localhost:3000"));
        incoming.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        incoming.insert(header::COOKIE, HeaderValue::from_static("session=abc"));
        incoming.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));

        let headers = upstream_request_headers(&incoming, &route);
        assert_eq!(headers.get(header::ORIGIN).unwrap(), "http://127.0.0.1:2718");
        assert_eq!(headers.get(header::COOKIE).unwrap(), "session=abc");
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_origin_is_added_when_absent() {
        let route = ProxyRoute::http("/auth", "http://localhost:2718");
        let headers = upstream_request_headers(&HeaderMap::new(), &route);
        assert_eq!(headers.get(header::ORIGIN).unwrap(), "http://localhost:2718");
    }

    #[test]
    fn test_response_headers_drop_transfer_encoding() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let headers = downstream_response_headers(&upstream);
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
    }
}
