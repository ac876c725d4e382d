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
use http::StatusCode;
use revamp_core::ServiceType;
use tokio::net::TcpStream;

use crate::http1;
use crate::pipeline::{process_request, AppState};
use crate::request::{PipelineRequest, PipelineResponse};

/// The plain-HTTP portal: serves the CA root
/// certificate for client trust-store installation and otherwise mounts the
/// same reserved-endpoint surface the proxy ingresses expose.
pub struct PortalService {
    state: Arc<AppState>,
}

impl PortalService {
    pub fn new(state: Arc<AppState>) -> Self {
        PortalService { state }
    }
}

#[async_trait]
impl ServiceType for PortalService {
    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = serve(&self.state, &mut stream, peer).await {
            tracing::debug!(peer = %peer, error = %e, "portal connection ended");
        }
    }
}

async fn serve(state: &Arc<AppState>, stream: &mut TcpStream, peer: SocketAddr) -> std::io::Result<()> {
    let request = match http1::read_request(stream).await? {
        Some(r) => r,
        None => return Ok(()),
    };

    let path = request.target.split(['?', '#']).next().unwrap_or(&request.target);
    let response = match path {
        "/ca.crt" | "/ca.pem" => ca_cert_response(state),
        _ => {
            let host = request.header_str("host").unwrap_or("localhost").to_string();
            let pipeline_request = PipelineRequest {
                scheme: "http",
                host,
                port: 8888,
                method: request.method,
                path: request.target,
                headers: request.headers,
                body: request.body,
                client_addr: peer,
            };
            process_request(state, pipeline_request).await
        }
    };

    http1::write_response(stream, &response).await?;
    let _ = tokio::io::AsyncWriteExt::shutdown(stream).await;
    Ok(())
}

fn ca_cert_response(state: &Arc<AppState>) -> PipelineResponse {
    let pem = state.cert_authority.root_cert_pem();
    PipelineResponse::with_body(StatusCode::OK, "application/x-x509-ca-cert", pem.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_paths_are_recognized() {
        for target in ["/ca.crt", "/ca.pem"] {
            let path = target.split(['?', '#']).next().unwrap_or(target);
            assert!(matches!(path, "/ca.crt" | "/ca.pem"));
        }
    }
}
