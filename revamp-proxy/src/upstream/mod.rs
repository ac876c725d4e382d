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

use std::io::Read;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::error::{ProxyError, ProxyResult};

const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers that are connection-scoped and must never be forwarded verbatim
/// in either direction.
const HOP_BY_HOP: &[&str] = &[
    "transfer-encoding",
    "content-encoding",
    "content-length",
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status_code: u16,
    pub status_message: String,
    pub headers: HeaderMap,
    pub decompressed_body: Vec<u8>,
    /// Set when decompression failed and `decompressed_body` is actually
    /// still the raw (compressed) bytes with `content-encoding` preserved.
    pub decompression_failed: bool,
}

/// Forwards a request to the origin and returns a decoded response.
/// Built directly on `reqwest` with automatic decompression disabled: the
/// crate needs to see the raw wire bytes and the original `content-encoding`
/// so it can implement the pass-through-on-decompression-failure contract
/// itself rather than have reqwest silently recover or mask the failure.
pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new() -> ProxyResult<Self> {
        // The `gzip`/`brotli`/`deflate` reqwest features are deliberately
        // left disabled in Cargo.toml: this client must see the raw wire
        // bytes and the original `content-encoding` so it can implement the
        // pass-through-on-failure contract itself instead of reqwest's
        // decompressing (and potentially masking corruption) behind our back.
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_UPSTREAM_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none)
            .build()
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("failed to build http client: {e}")))?;
        Ok(UpstreamClient { client })
    }

    pub async fn fetch(
        &self,
        scheme: &str,
        host: &str,
        port: u16,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: Vec<u8>,
    ) -> ProxyResult<UpstreamResponse> {
        let url = build_url(scheme, host, port, path);

        let mut outbound_headers = HeaderMap::new();
        for (name, value) in headers.iter() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            outbound_headers.insert(name.clone(), value.clone());
        }
        outbound_headers
            .insert(HeaderName::from_static("accept-encoding"), HeaderValue::from_static("gzip, deflate"));

        let request = self
            .client
            .request(method.clone(), &url)
            .headers(outbound_headers)
            .body(body)
            .build()
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("invalid request for {url}: {e}")))?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("request to {url} failed: {e}")))?;

        let status_code = response.status().as_u16();
        let status_message = response.status().canonical_reason().unwrap_or("").to_string();
        let response_headers = response.headers().clone();

        let content_encoding = response_headers
            .get(http::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase());

        let raw_body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::UpstreamProtocolError(format!("premature EOF reading body from {url}: {e}")))?
            .to_vec();

        let (decompressed_body, decompression_failed) = match content_encoding.as_deref() {
            Some("gzip") => decompress_gzip(&raw_body),
            Some("deflate") => decompress_deflate(&raw_body),
            Some("br") => decompress_brotli(&raw_body),
            _ => (raw_body, false),
        };

        Ok(UpstreamResponse {
                status_code,
                status_message,
                headers: response_headers,
                decompressed_body,
                decompression_failed,
        })
    }
}

fn build_url(scheme: &str, host: &str, port: u16, path: &str) -> String {
    let default_port = if scheme == "https" { 443 } else { 80 };
    if port == default_port {
        format!("{scheme}://{host}{path}")
    } else {
        format!("{scheme}://{host}:{port}{path}")
    }
}

/// On failure, pass the compressed bytes through unchanged: the caller must leave `content-encoding` intact
/// and skip transformation.
fn decompress_gzip(raw: &[u8]) -> (Vec<u8>, bool) {
    let mut decoder = flate2::read::GzDecoder::new(raw);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => (out, false),
        Err(e) => {
            tracing::warn!(error = %e, "gzip decompression failed, passing bytes through unchanged");
            (raw.to_vec(), true)
        }
    }
}

fn decompress_deflate(raw: &[u8]) -> (Vec<u8>, bool) {
    let mut decoder = flate2::read::DeflateDecoder::new(raw);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => (out, false),
        Err(e) => {
            tracing::warn!(error = %e, "deflate decompression failed, passing bytes through unchanged");
            (raw.to_vec(), true)
        }
    }
}

fn decompress_brotli(raw: &[u8]) -> (Vec<u8>, bool) {
    let mut out = Vec::new();
    let mut cursor = std::io::Cursor::new(raw);
    match brotli::BrotliDecompress(&mut cursor, &mut out) {
        Ok(_) => (out, false),
        Err(e) => {
            tracing::warn!(error = %e, "brotli decompression failed, passing bytes through unchanged");
            (raw.to_vec(), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_is_case_insensitive() {
        assert!(is_hop_by_hop("Content-Length"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(!is_hop_by_hop("content-type"));
    }

    #[test]
    fn build_url_omits_default_port() {
        assert_eq!(build_url("https", "example.com", 443, "/a"), "https://example.com/a");
        assert_eq!(build_url("https", "example.com", 8443, "/a"), "https://example.com:8443/a");
        assert_eq!(build_url("http", "example.com", 80, "/"), "http://example.com/");
    }

    #[test]
    fn gzip_round_trips() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello world").unwrap();
        let compressed = encoder.finish().unwrap();

        let (decompressed, failed) = decompress_gzip(&compressed);
        assert!(!failed);
        assert_eq!(decompressed, b"hello world");
    }

    #[test]
    fn corrupt_gzip_passes_through_unchanged() {
        let garbage = vec![0xFFu8; 16];
        let (out, failed) = decompress_gzip(&garbage);
        assert!(failed);
        assert_eq!(out, garbage);
    }
}
