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

use std::sync::Arc;

use http::{Method, StatusCode};
use serde_json::json;

use crate::filter::RESERVED_PREFIX;
use crate::pipeline::AppState;
use crate::request::{PipelineRequest, PipelineResponse};

/// Dispatches a request whose path starts with [`RESERVED_PREFIX`], entirely bypassing cache/upstream/transform.
pub async fn dispatch(state: &Arc<AppState>, request: &PipelineRequest) -> PipelineResponse {
    let sub_path = &request.path[RESERVED_PREFIX.len()..];
    let sub_path = sub_path.split(['?', '#']).next().unwrap_or(sub_path);

    match sub_path {
        "config" => config_endpoint(state, request).await,
        "metrics" => metrics_dashboard(),
        "metrics/json" => PipelineResponse::json(StatusCode::OK, &json!(state.metrics.snapshot())),
        "api/health" => PipelineResponse::json(StatusCode::OK, &json!({"status": "healthy"})),
        "sw/remote" => PipelineResponse::with_body(
            StatusCode::NOT_IMPLEMENTED,
            "text/plain",
            b"remote service worker channel is not available over plain HTTP".to_vec(),
        ),
        other if other.starts_with("plugins/") => plugin_endpoint(state, other, request).await,
        _ => PipelineResponse::with_body(StatusCode::NOT_FOUND, "text/plain", b"not found".to_vec()),
    }
}

/// `GET`/`POST`/`DELETE`/`OPTIONS` against the per-client config overlay:
/// every mutating verb still answers with the caller's new *effective*
/// config so a client never has to issue a follow-up GET to see what
/// took effect.
async fn config_endpoint(state: &Arc<AppState>, request: &PipelineRequest) -> PipelineResponse {
    let client_key = request.client_key();
    match request.method {
        Method::GET => {
            let effective = state.config.resolve_for(Some(&client_key));
            PipelineResponse::json(StatusCode::OK, &json!({"success": true, "config": effective}))
        }
        Method::POST | Method::PUT => match serde_json::from_slice(&request.body) {
            Ok(overlay) => {
                state.config.set_overlay(&client_key, overlay);
                let effective = state.config.resolve_for(Some(&client_key));
                PipelineResponse::json(StatusCode::OK, &json!({"success": true, "config": effective}))
            }
            Err(e) => PipelineResponse::json(
                StatusCode::BAD_REQUEST,
                &json!({"success": false, "error": format!("invalid overlay body: {e}")}),
            ),
        },
        Method::DELETE => {
            state.config.set_overlay(&client_key, Default::default());
            let effective = state.config.resolve_for(Some(&client_key));
            PipelineResponse::json(StatusCode::OK, &json!({"success": true, "config": effective}))
        }
        Method::OPTIONS => crate::request::cors_preflight_response(request.header_str("origin")),
        _ => PipelineResponse::new(StatusCode::METHOD_NOT_ALLOWED),
    }
}

/// A minimal HTML shell for the metrics dashboard. Rendering/interactivity
/// is intentionally out of scope; `metrics/json` is the real surface
/// plugins and tooling read from.
fn metrics_dashboard() -> PipelineResponse {
    let body = b"<!doctype html><html><head><title>Revamp Proxy</title></head>\
    <body><h1>Revamp Proxy</h1><p>See <a href=\"/__revamp__/metrics/json\">metrics/json</a>.</p></body></html>"
        .to_vec();
    PipelineResponse::with_body(StatusCode::OK, "text/html; charset=utf-8", body)
}

/// `/__revamp__/plugins/{pluginId}/{path}`.
async fn plugin_endpoint(state: &Arc<AppState>, sub_path: &str, request: &PipelineRequest) -> PipelineResponse {
    let rest = &sub_path["plugins/".len()..];
    let Some((plugin_id, path)) = rest.split_once('/') else {
        return PipelineResponse::with_body(StatusCode::NOT_FOUND, "text/plain", b"missing plugin path".to_vec());
    };

    match state.plugins.dispatch_endpoint(plugin_id, path, &request.body).await {
        Some(Ok(bytes)) => PipelineResponse::with_body(StatusCode::OK, "application/octet-stream", bytes),
        Some(Err(err)) => {
            PipelineResponse::with_body(err.status_code(), "text/plain", format!("{err}").into_bytes())
        }
        None => PipelineResponse::with_body(StatusCode::NOT_FOUND, "text/plain", b"no such plugin endpoint".to_vec()),
    }
}
