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

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::request::PipelineResponse;

/// Headers are capped well below what any legitimate browser or API client
/// sends, bounding the accumulation buffer against a slow/malicious peer
/// that never sends `\r\n\r\n`.
const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug)]
pub struct RawRequest {
    pub method: Method,
    /// Request-target verbatim: an absolute-URI for the plain HTTP proxy,
    /// or a path for requests read off an intercepted TLS/plaintext stream.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawRequest {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.header_str("upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false)
        && self
            .header_str("connection")
            .map(|v| v.to_ascii_lowercase().contains("upgrade"))
            .unwrap_or(false)
    }
}

/// Reads one HTTP/1.1 request head-then-body off `stream`.
/// Returns `Ok(None)` on a clean EOF before any bytes arrive.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Option<RawRequest>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "request header too large"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed mid-request"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut header_storage);
    let parse_result = parsed
        .parse(&buf[..header_end])
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("malformed request: {e}")))?;
    if parse_result.is_partial {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "incomplete request line"));
    }

    let method = parsed
        .method
        .and_then(|m| m.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "missing or invalid method"))?;
    let target = parsed
        .path
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request target"))?
        .to_string();

    let mut headers = HeaderMap::new();
    for header in parsed.headers.iter() {
        if let (Ok(name), Ok(value)) =
        (HeaderName::from_bytes(header.name.as_bytes()), HeaderValue::from_bytes(header.value))
        {
            headers.append(name, value);
        }
    }

    let content_length: usize = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "request body too large"));
    }

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed mid-body"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(RawRequest { method, target, headers, body }))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Reconstructs the raw request head for a [`RawRequest`] that's being
/// spliced straight through to the real origin instead of handed to the
/// pipeline: the bytes already consumed
/// by [`read_request`] have to be replayed onto the new upstream connection.
pub fn format_request_head(request: &RawRequest) -> Vec<u8> {
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, request.target);
    for (name, value) in request.headers.iter() {
        if let Ok(value) = value.to_str() {
            head.push_str(name.as_str());
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
    }
    head.push_str("\r\n");
    head.into_bytes()
}

/// Serializes a [`PipelineResponse`] as an HTTP/1.1 response onto `stream`.
pub async fn write_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    response: &PipelineResponse,
) -> std::io::Result<()> {
    let reason = response.status.canonical_reason().unwrap_or("");
    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status.as_u16(), reason);
    for (name, value) in response.headers.iter() {
        if let Ok(value) = value.to_str() {
            head.push_str(name.as_str());
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await
}

/// Writes a bare-bones error response for failures that occur before the
/// pipeline has a chance to build one (malformed request lines, handshake
/// failures).
pub async fn write_plain_error<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: http::StatusCode,
    message: &str,
) -> std::io::Result<()> {
    let body = message.as_bytes();
    let head = format!(
        "HTTP/1.1 {} {}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_a_get_request_with_no_body() {
        let raw = b"GET /foo?bar HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let request = read_request(&mut cursor).await.unwrap().unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.target, "/foo?bar");
        assert_eq!(request.header_str("host"), Some("example.com"));
        assert!(request.body.is_empty());
    }

    #[tokio::test]
    async fn reads_a_post_request_with_body_by_content_length() {
        let raw = b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let request = read_request(&mut cursor).await.unwrap().unwrap();
        assert_eq!(request.body, b"hello");
    }

    #[tokio::test]
    async fn clean_eof_before_any_bytes_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_request(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn detects_websocket_upgrade() {
        let raw = b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let request = read_request(&mut cursor).await.unwrap().unwrap();
        assert!(request.is_websocket_upgrade());
    }
}
