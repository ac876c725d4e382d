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
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use revamp_core::ServiceType;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::http1::{self, RawRequest};
use crate::pipeline::{process_request, AppState};
use crate::request::PipelineRequest;

/// The plain HTTP/1.1 proxy ingress: absolute-URI requests and
/// `CONNECT` tunnels on the same listening port.
pub struct HttpProxyService {
    state: Arc<AppState>,
}

impl HttpProxyService {
    pub fn new(state: Arc<AppState>) -> Self {
        HttpProxyService { state }
    }
}

#[async_trait]
impl ServiceType for HttpProxyService {
    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = serve(&self.state, &mut stream, peer).await {
            tracing::debug!(peer = %peer, error = %e, "http proxy connection ended");
        }
    }
}

async fn serve(state: &Arc<AppState>, stream: &mut TcpStream, peer: SocketAddr) -> std::io::Result<()> {
    let request = match http1::read_request(stream).await? {
        Some(r) => r,
        None => return Ok(()),
    };

    if request.method == Method::CONNECT {
        return handle_connect(state, stream, peer, request).await;
    }

    let (scheme, host, port, path) = match split_absolute_uri(&request.target) {
        Some(parts) => parts,
        None => {
            http1::write_plain_error(stream, http::StatusCode::BAD_REQUEST, "expected an absolute-URI request target")
                .await?;
            return Ok(());
        }
    };

    let pipeline_request = PipelineRequest {
        scheme,
        host,
        port,
        method: request.method,
        path,
        headers: request.headers,
        body: request.body,
        client_addr: peer,
    };
    let response = process_request(state, pipeline_request).await;
    http1::write_response(stream, &response).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// `CONNECT host:port`: reuses the SOCKS5 module's TLS-interception
/// path for port 443, and otherwise falls back to a raw splice.
async fn handle_connect(
    state: &Arc<AppState>,
    stream: &mut TcpStream,
    peer: SocketAddr,
    request: RawRequest,
) -> std::io::Result<()> {
    let Some((host, port)) = request.target.split_once(':') else {
        http1::write_plain_error(stream, http::StatusCode::BAD_REQUEST, "CONNECT target must be host:port").await?;
        return Ok(());
    };
    let Ok(port) = port.parse::<u16>() else {
        http1::write_plain_error(stream, http::StatusCode::BAD_REQUEST, "invalid CONNECT port").await?;
        return Ok(());
    };
    let host = host.to_string();

    let profile = state.config.profile_for(&host);
    let base = state.config.snapshot();
    if crate::filter::should_block_domain(&host, profile.as_ref(), &base) {
        http1::write_plain_error(stream, http::StatusCode::FORBIDDEN, "domain blocked by filter").await?;
        return Ok(());
    }

    stream.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await?;

    if port == 443 {
        serve_tunnel_tls(state, stream, peer, host, port).await
    } else {
        let mut upstream = TcpStream::connect((host.as_str(), port)).await?;
        tokio::io::copy_bidirectional(stream, &mut upstream).await?;
        Ok(())
    }
}

async fn serve_tunnel_tls(
    state: &Arc<AppState>,
    stream: &mut TcpStream,
    peer: SocketAddr,
    host: String,
    port: u16,
) -> std::io::Result<()> {
    let leaf = match state.cert_authority.leaf_for(&host) {
        Ok(leaf) => leaf,
        Err(e) => {
            tracing::warn!(host, error = %e, "failed to mint leaf certificate for CONNECT tunnel");
            return Ok(());
        }
    };
    let acceptor = TlsAcceptor::from(leaf.server_config.clone());
    let mut tls_stream = match acceptor.accept(stream).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(host, error = %e, "tls handshake inside CONNECT tunnel failed");
            return Ok(());
        }
    };

    let request = match http1::read_request(&mut tls_stream).await? {
        Some(r) => r,
        None => return Ok(()),
    };

    let pipeline_request = PipelineRequest {
        scheme: "https",
        host,
        port,
        method: request.method,
        path: request.target,
        headers: request.headers,
        body: request.body,
        client_addr: peer,
    };
    let response = process_request(state, pipeline_request).await;
    http1::write_response(&mut tls_stream, &response).await?;
    let _ = tls_stream.shutdown().await;
    Ok(())
}

/// Splits an absolute-URI proxy request target into `(scheme, host, port,
/// path)`. Rejects origin-form targets: a plain HTTP proxy must
/// receive the full URI, unlike a server.
fn split_absolute_uri(target: &str) -> Option<(&'static str, String, u16, String)> {
    let url = url::Url::parse(target).ok()?;
    let scheme = match url.scheme() {
        "http" => "http",
        "https" => "https",
        _ => return None,
    };
    let host = url.host_str()?.to_string();
    let port = url.port().unwrap_or(if scheme == "https" { 443 } else { 80 });
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    if path.is_empty() {
        path.push('/');
    }
    Some((scheme, host, port, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_absolute_uri_with_query() {
        let (scheme, host, port, path) = split_absolute_uri("http://example.com/a/b?x=1").unwrap();
        assert_eq!(scheme, "http");
        assert_eq!(host, "example.com");
        assert_eq!(port, 80);
        assert_eq!(path, "/a/b?x=1");
    }

    #[test]
    fn rejects_origin_form_targets() {
        assert!(split_absolute_uri("/just/a/path").is_none());
    }
}
