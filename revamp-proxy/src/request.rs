/**
 * Copyright (c) 2024-2025 ArcX, Inc.
 *
 * This file is part of Revamp Proxy
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

use std::net::SocketAddr;

use http::{HeaderMap, HeaderValue, Method, StatusCode};

/// The `(method, target URL, headers, body, client address)` tuple every
/// ingress (SOCKS5-over-TLS, SOCKS5-plaintext, HTTP proxy) extracts before
/// handing off to the shared request pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub scheme: &'static str,
    pub host: String,
    pub port: u16,
    pub method: Method,
    /// Path plus query string, always leading with `/`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub client_addr: SocketAddr,
}

impl PipelineRequest {
    /// The absolute URL this request targets, used as the cache/filter/hook
    /// key throughout the pipeline.
    pub fn url(&self) -> String {
        let default_port = if self.scheme == "https" { 443 } else { 80 };
        if self.port == default_port {
            format!("{}://{}{}", self.scheme, self.host, self.path)
        } else {
            format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
        }
    }

    pub fn client_key(&self) -> String {
        self.client_addr.ip().to_string()
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The framed response a pipeline run produces, handed back to the ingress
/// that's responsible for writing it onto the client's wire format.
#[derive(Debug, Clone)]
pub struct PipelineResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl PipelineResponse {
    pub fn new(status: StatusCode) -> Self {
        PipelineResponse { status, headers: HeaderMap::new(), body: Vec::new() }
    }

    pub fn with_body(status: StatusCode, content_type: &str, body: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(http::header::CONTENT_TYPE, value);
        }
        PipelineResponse { status, headers, body }
    }

    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self::with_body(status, "application/json", body)
    }
}

/// Adds the CORS headers every framed response carries: mirror the request's `Origin` header when present,
/// falling back to `*` only when absent, since browsers reject `*` paired
/// with `Allow-Credentials: true` on a credentialed request.
pub fn apply_cors(response: &mut PipelineResponse, request_origin: Option<&str>) {
    let origin_value = request_origin.unwrap_or("*");
    if let Ok(value) = HeaderValue::from_str(origin_value) {
        response.headers.insert("access-control-allow-origin", value);
    }
    response.headers.insert("access-control-allow-credentials", HeaderValue::from_static("true"));
}

/// The synthetic CORS preflight response for an `OPTIONS` request: skips cache/upstream/transform/post-hooks entirely.
pub fn cors_preflight_response(request_origin: Option<&str>) -> PipelineResponse {
    let mut response = PipelineResponse::new(StatusCode::NO_CONTENT);
    response.headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS, PATCH"),
    );
    response.headers.insert("access-control-allow-headers", HeaderValue::from_static("*"));
    response.headers.insert("access-control-max-age", HeaderValue::from_static("86400"));
    apply_cors(&mut response, request_origin);
    response
}

/// Removes the hop-by-hop headers from an outgoing
/// response header map before framing the final `Content-Length`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let hop_by_hop: Vec<http::HeaderName> = headers
        .keys()
        .filter(|name| crate::upstream::is_hop_by_hop(name.as_str()))
        .cloned()
        .collect();
    for name in hop_by_hop {
        headers.remove(name);
    }
}

/// Parses an `Accept-Encoding` header's comma-separated token list and reports whether `gzip` is
/// among them, case-insensitively.
pub fn accepts_gzip(accept_encoding: Option<&str>) -> bool {
    let Some(header) = accept_encoding else { return false };
    header.split(',').any(|token| {
            let token = token.split(';').next().unwrap_or("").trim();
            token.eq_ignore_ascii_case("gzip")
    })
}

/// Whether a media type belongs to the "text family" eligible for gzip
/// compression at framing time.
pub fn is_text_family(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/")
    || ct.contains("javascript")
    || ct.contains("ecmascript")
    || ct.contains("json")
    || ct.contains("xml")
    || ct.contains("svg")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(scheme: &'static str, host: &str, port: u16, path: &str) -> PipelineRequest {
        PipelineRequest {
            scheme,
            host: host.to_string(),
            port,
            method: Method::GET,
            path: path.to_string(),
            headers: HeaderMap::new(),
            body: Vec::new(),
            client_addr: "127.0.0.1:9999".parse().unwrap(),
        }
    }

    #[test]
    fn url_omits_default_port_but_keeps_nonstandard_ones() {
        assert_eq!(req("https", "example.com", 443, "/a").url(), "https://example.com/a");
        assert_eq!(req("https", "example.com", 8443, "/a").url(), "https://example.com:8443/a");
        assert_eq!(req("http", "example.com", 80, "/").url(), "http://example.com/");
    }

    #[test]
    fn client_key_is_the_bare_ip() {
        assert_eq!(req("http", "x", 80, "/").client_key(), "127.0.0.1");
    }

    #[test]
    fn cors_mirrors_origin_when_present_and_falls_back_to_star() {
        let mut response = PipelineResponse::new(StatusCode::OK);
        apply_cors(&mut response, Some("https://app.example.com"));
        assert_eq!(
            response.headers.get("access-control-allow-origin").unwrap(),
            "https://app.example.com"
        );

        let mut response = PipelineResponse::new(StatusCode::OK);
        apply_cors(&mut response, None);
        assert_eq!(response.headers.get("access-control-allow-origin").unwrap(), "*");
    }

    #[test]
    fn preflight_response_is_no_content_with_cors_headers() {
        let response = cors_preflight_response(Some("https://app.example.com"));
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(response.headers.contains_key("access-control-allow-methods"));
        assert_eq!(
            response.headers.get("access-control-allow-origin").unwrap(),
            "https://app.example.com"
        );
    }

    #[test]
    fn strip_hop_by_hop_removes_only_connection_scoped_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("5"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        strip_hop_by_hop(&mut headers);
        assert!(!headers.contains_key("content-length"));
        assert!(!headers.contains_key("connection"));
        assert!(headers.contains_key("content-type"));
    }

    #[test]
    fn accepts_gzip_checks_each_comma_separated_token() {
        assert!(accepts_gzip(Some("deflate, gzip;q=0.8")));
        assert!(accepts_gzip(Some("GZIP")));
        assert!(!accepts_gzip(Some("deflate, br")));
        assert!(!accepts_gzip(None));
    }

    #[test]
    fn is_text_family_covers_scriptable_and_markup_types() {
        assert!(is_text_family("text/html"));
        assert!(is_text_family("application/javascript"));
        assert!(is_text_family("application/json; charset=utf-8"));
        assert!(is_text_family("image/svg+xml"));
        assert!(!is_text_family("image/png"));
        assert!(!is_text_family("application/octet-stream"));
    }
}
