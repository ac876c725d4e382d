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

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use revamp_core::ServiceType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::filter;
use crate::http1::{self, RawRequest};
use crate::pipeline::{process_request, AppState};
use crate::request::PipelineRequest;
use crate::tls_client::insecure_client_config;

/// First bytes a misdirected HTTP client (pointed at the SOCKS5 port instead
/// of the HTTP proxy port) would send: the leading ASCII byte of `CONNECT`,
/// `DELETE`, `GET`, `HEAD`, `OPTIONS`, `POST`/`PUT`/`PATCH`.
const MISDIRECTED_HTTP_BYTES: &[u8] = &[b'C', b'D', b'G', b'H', b'O', b'P'];

const SOCKS_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// Caps how many bytes the request-parsing state machine will accumulate
/// before giving up on a malformed/hostile client.
const MAX_REQUEST_ACCUMULATION: usize = 300;

pub struct Socks5Service {
    state: Arc<AppState>,
}

impl Socks5Service {
    pub fn new(state: Arc<AppState>) -> Self {
        Socks5Service { state }
    }
}

#[async_trait]
impl ServiceType for Socks5Service {
    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = serve(&self.state, &mut stream, peer).await {
            tracing::debug!(peer = %peer, error = %e, "socks5 connection ended");
        }
    }
}

async fn serve(state: &Arc<AppState>, stream: &mut TcpStream, peer: SocketAddr) -> std::io::Result<()> {
    let mut sniff = [0u8; 1];
    let n = stream.peek(&mut sniff).await?;
    if n == 0 {
        return Ok(());
    }

    if sniff[0] != SOCKS_VERSION {
        // A misdirected HTTP client, or any other non-SOCKS5 byte: close
        // without writing a reply.
        return Ok(());
    }

    if !greeting(stream).await? {
        return Ok(());
    }
    let (host, port) = match connect_request(stream).await? {
        Some(target) => target,
        None => return Ok(()),
    };

    let profile = state.config.profile_for(&host);
    let base = state.config.snapshot();
    if filter::should_block_domain(&host, profile.as_ref(), &base) {
        // The client sees an instantly closed tunnel, not a visible denial:
        // a success reply followed by an immediate close.
        send_reply(stream, REP_SUCCESS).await?;
        tracing::debug!(peer = %peer, host, "socks5 connect blocked by domain filter");
        return Ok(());
    }

    send_reply(stream, REP_SUCCESS).await?;

    match port {
        443 => serve_tls(state, stream, peer, host, port).await,
        80 => serve_plaintext(state, stream, peer, host, port, "http").await,
        _ => splice_raw(stream, &host, port).await,
    }
}

/// Reads the greeting and replies. Returns `Ok(true)` if the client offered
/// no-auth and the handshake should proceed to the CONNECT request,
/// `Ok(false)` if no acceptable method was offered (reply `0xFF` already
/// written, connection should close).
async fn greeting(stream: &mut TcpStream) -> std::io::Result<bool> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;
    // No-auth-required is the only method this LAN proxy offers.
    if methods.contains(&0x00) {
        stream.write_all(&[SOCKS_VERSION, 0x00]).await?;
        Ok(true)
    } else {
        stream.write_all(&[SOCKS_VERSION, 0xFF]).await?;
        Ok(false)
    }
}

async fn connect_request(stream: &mut TcpStream) -> std::io::Result<Option<(String, u16)>> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    let (version, cmd, atyp) = (head[0], head[1], head[3]);
    if version != SOCKS_VERSION {
        return Ok(None);
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let len = len[0] as usize;
            if len > MAX_REQUEST_ACCUMULATION {
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "domain name too long"));
            }
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await?;
            String::from_utf8(domain)
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "domain is not valid utf-8"))?
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            Ipv6Addr::from(addr).to_string()
        }
        _ => {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "unsupported address type"));
        }
    };

    let mut port_bytes = [0u8; 2];
    stream.read_exact(&mut port_bytes).await?;
    let port = u16::from_be_bytes(port_bytes);

    if cmd != CMD_CONNECT {
        send_reply(stream, REP_COMMAND_NOT_SUPPORTED).await?;
        return Ok(None);
    }

    Ok(Some((host, port)))
}

async fn send_reply(stream: &mut TcpStream, rep: u8) -> std::io::Result<()> {
    let mut reply = vec![SOCKS_VERSION, rep, 0x00, ATYP_IPV4];
    reply.extend_from_slice(&[0, 0, 0, 0]);
    reply.extend_from_slice(&[0, 0]);
    stream.write_all(&reply).await
}

/// Terminates TLS with a freshly minted leaf for `host`, then runs the
/// decrypted stream through the same single-request-per-connection engine
/// as the plaintext path.
async fn serve_tls(
    state: &Arc<AppState>,
    stream: &mut TcpStream,
    peer: SocketAddr,
    host: String,
    port: u16,
) -> std::io::Result<()> {
    let leaf = match state.cert_authority.leaf_for(&host) {
        Ok(leaf) => leaf,
        Err(e) => {
            tracing::warn!(host, error = %e, "failed to mint leaf certificate");
            return Ok(());
        }
    };
    let acceptor = TlsAcceptor::from(leaf.server_config.clone());
    let mut tls_stream = match acceptor.accept(stream).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(host, error = %e, "tls handshake with client failed");
            return Ok(());
        }
    };

    let request = match http1::read_request(&mut tls_stream).await? {
        Some(r) => r,
        None => return Ok(()),
    };

    if request.is_websocket_upgrade() {
        return splice_websocket(&mut tls_stream, &host, port, &request, true).await;
    }

    let pipeline_request = to_pipeline_request("https", &host, port, peer, request);
    let response = process_request(state, pipeline_request).await;
    http1::write_response(&mut tls_stream, &response).await?;
    let _ = tls_stream.shutdown().await;
    Ok(())
}

async fn serve_plaintext(
    state: &Arc<AppState>,
    stream: &mut TcpStream,
    peer: SocketAddr,
    host: String,
    port: u16,
    scheme: &'static str,
) -> std::io::Result<()> {
    let request = match http1::read_request(stream).await? {
        Some(r) => r,
        None => return Ok(()),
    };

    if request.is_websocket_upgrade() {
        return splice_websocket(stream, &host, port, &request, false).await;
    }

    let pipeline_request = to_pipeline_request(scheme, &host, port, peer, request);
    let response = process_request(state, pipeline_request).await;
    http1::write_response(stream, &response).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

fn to_pipeline_request(
    scheme: &'static str,
    host: &str,
    port: u16,
    peer: SocketAddr,
    request: RawRequest,
) -> PipelineRequest {
    PipelineRequest {
        scheme,
        host: host.to_string(),
        port,
        method: request.method,
        path: request.target,
        headers: request.headers,
        body: request.body,
        client_addr: peer,
    }
}

/// Bypasses the pipeline entirely and splices raw bytes between the client
/// and a fresh connection to the real origin. The already-consumed request head is replayed first.
async fn splice_websocket<S>(client: &mut S, host: &str, port: u16, request: &RawRequest, tls: bool) -> std::io::Result<()>
where
S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let head = http1::format_request_head(request);
    let mut upstream = TcpStream::connect((host, port)).await?;

    if tls {
        let connector = tokio_rustls::TlsConnector::from(insecure_client_config());
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid server name"))?;
        let mut upstream_tls = connector.connect(server_name, upstream).await?;
        upstream_tls.write_all(&head).await?;
        tokio::io::copy_bidirectional(client, &mut upstream_tls).await?;
    } else {
        upstream.write_all(&head).await?;
        tokio::io::copy_bidirectional(client, &mut upstream).await?;
    }
    Ok(())
}

/// Raw TCP splice for every non-80/443 destination port: no
/// interception, no pipeline, just a bidirectional byte relay.
async fn splice_raw(client: &mut TcpStream, host: &str, port: u16) -> std::io::Result<()> {
    let mut upstream = TcpStream::connect((host, port)).await?;
    tokio::io::copy_bidirectional(client, &mut upstream).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misdirected_http_bytes_cover_common_verbs() {
        for verb in ["CONNECT", "DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT", "PATCH"] {
            let first = verb.as_bytes()[0];
            assert!(MISDIRECTED_HTTP_BYTES.contains(&first), "missing {verb}");
        }
    }
}
