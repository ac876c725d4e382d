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

use std::io::Write;
use std::sync::Arc;

use http::{HeaderValue, StatusCode};
use serde_json::json;

use crate::cache::ContentCache;
use crate::cert::CertificateAuthority;
use crate::config::model::ProxyConfig;
use crate::config::store::ConfigStore;
use crate::error::log_and_continue;
use crate::filter;
use crate::hooks::types::HookName;
use crate::metrics::Metrics;
use crate::plugins::PluginManager;
use crate::request::{accepts_gzip, apply_cors, cors_preflight_response, is_text_family, strip_hop_by_hop};
use crate::request::{PipelineRequest, PipelineResponse};
use crate::transform::{classify, classify_by_extension_for_cache, TransformerRegistry};
use crate::upstream::UpstreamClient;

/// Everything the three ingresses (SOCKS5, HTTP proxy, portal) and the
/// reserved internal endpoints share: config, the two-tier cache, the
/// certificate authority, the upstream client, the plugin system, the
/// transformer registry, and process-wide metrics.
pub struct AppState {
    pub config: ConfigStore,
    pub cache: ContentCache,
    pub cert_authority: CertificateAuthority,
    pub upstream: UpstreamClient,
    pub plugins: PluginManager,
    pub transformers: TransformerRegistry,
    pub metrics: Arc<Metrics>,
}

/// Runs the full per-request engine: pre-hooks, filter, CORS preflight,
/// cache, upstream fetch, classify/transform, post-hooks, then framing.
pub async fn process_request(state: &Arc<AppState>, request: PipelineRequest) -> PipelineResponse {
    state.metrics.record_request();

    // Step 1: effective config resolution.
    let client_key = request.client_key();
    let effective = state.config.resolve_for(Some(&client_key));
    let request_origin = request.header_str("origin").map(|s| s.to_string());

    // Step 2: reserved path routing.
    if request.path.starts_with(filter::RESERVED_PREFIX) {
        let mut response = crate::endpoints::dispatch(state, &request).await;
        apply_cors(&mut response, request_origin.as_deref());
        return response;
    }

    let url = request.url();
    let profile = effective.base.domain_profiles.get(&request.host).cloned();
    let filter_cfg = filter_config(&effective.base, &effective);

    // Step 3: pre-request hook phase.
    let mut effective_url = url.clone();
    let mut effective_headers = request.headers.clone();
    if state.plugins.has_hooks(HookName::RequestPre) {
        let ctx = json!({
                "method": request.method.as_str(),
                "host": request.host,
                "path": request.path,
                "url": url,
                "client": client_key,
        });
        let outcome = state.plugins.executor.execute_sequential(HookName::RequestPre, ctx).await;
        if let Some(blocked_response) = blocked_response_from(&outcome.value) {
            let mut response = blocked_response;
            apply_cors(&mut response, request_origin.as_deref());
            return response;
        }
        if let Some(overridden_url) = outcome.value.get("url").and_then(|v| v.as_str()) {
            effective_url = overridden_url.to_string();
        }
        if let Some(header_overrides) = outcome.value.get("headers").and_then(|v| v.as_object()) {
            for (name, value) in header_overrides {
                if let (Ok(name), Some(value)) =
                (http::HeaderName::try_from(name.as_str()), value.as_str())
                {
                    if let Ok(value) = HeaderValue::from_str(value) {
                        effective_headers.insert(name, value);
                    }
                }
            }
        }
    }

    // Step 4: filter decision.
    let blocked = filter::should_block_domain(&request.host, profile.as_ref(), &filter_cfg)
    || filter::should_block_url(&effective_url, profile.as_ref(), &filter_cfg);
    if blocked {
        state.metrics.record_blocked();
        let mut response = PipelineResponse::new(StatusCode::NO_CONTENT);
        apply_cors(&mut response, request_origin.as_deref());
        return response;
    }

    // Step 5: CORS preflight.
    if request.method == http::Method::OPTIONS {
        return cors_preflight_response(request_origin.as_deref());
    }

    // Step 6: cache lookup.
    let cache_content_type = classify_by_extension_for_cache(&request.path);
    let config_hash = effective.config_hash_prefix();
    let cached = state
        .cache
        .get_cached(&effective_url, cache_content_type, Some(&client_key), &config_hash, effective.cache_enabled, effective.base.cache_ttl_seconds)
        .await;

    let (mut body, mut content_type, status, mut response_headers);

    if let Some(cached_bytes) = cached {
        // A cache hit is already-transformed output:
        // skip straight to post-response hooks without re-invoking step 8.
        state.metrics.record_cache_hit();
        body = cached_bytes;
        content_type = cache_content_type.to_string();
        status = StatusCode::OK;
        response_headers = http::HeaderMap::new();
    } else {
        state.metrics.record_cache_miss();

        // Step 7: upstream fetch.
        let upstream_result = state
            .upstream
            .fetch(request.scheme, &request.host, request.port, &request.method, &request.path, &effective_headers, request.body.clone())
            .await;

        let upstream = match upstream_result {
            Ok(upstream) => upstream,
            Err(err) => {
                state.metrics.record_error();
                let err = log_and_continue(err, &effective_url);
                let mut response = PipelineResponse::with_body(
                    err.status_code(),
                    "text/plain",
                    format!("upstream error: {err}").into_bytes(),
                );
                apply_cors(&mut response, request_origin.as_deref());
                return response;
            }
        };

        let response_content_type =
        upstream.headers.get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
        let kind = classify(response_content_type.as_deref(), &request.path);

        if ContentCache::is_redirect_status(upstream.status_code) {
            let has_location = upstream.headers.get(http::header::LOCATION).is_some();
            if !has_location || kind == crate::transform::ContentKind::Other {
                state.cache.mark_as_redirect(&effective_url);
            }
        }

        status = StatusCode::from_u16(upstream.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
        response_headers = upstream.headers;

        // Step 8: classify & transform. Open question #2: a decompression
        // failure skips transformation and serves the (still compressed)
        // bytes through untransformed.
        if upstream.decompression_failed {
            body = upstream.decompressed_body;
            content_type = response_content_type.unwrap_or_else(|| cache_content_type.to_string());
        } else if kind == crate::transform::ContentKind::Other {
            body = upstream.decompressed_body;
            content_type = response_content_type.unwrap_or_else(|| cache_content_type.to_string());
        } else {
            match state.transformers.transform(kind, &upstream.decompressed_body, &effective_url, &effective) {
                Ok(transformed) => {
                    state.metrics.record_transform(kind.as_str());
                    state.cache.set_cache(&effective_url, cache_content_type, transformed.clone(), Some(&client_key), &config_hash, effective.cache_enabled);
                    body = transformed;
                }
                Err(err) => {
                    tracing::warn!(url = %effective_url, kind = kind.as_str(), error = %err, "content transform failed, serving untransformed upstream bytes");
                    body = upstream.decompressed_body;
                }
            }
            content_type = response_content_type.unwrap_or_else(|| kind.as_str().to_string());
        }
    }

    // Step 9: post-response hook phase.
    let mut final_status = status;
    if state.plugins.has_hooks(HookName::ResponsePost) {
        let ctx = json!({
                "url": effective_url,
                "status": final_status.as_u16(),
                "contentType": content_type,
                "bodyLength": body.len(),
        });
        let outcome = state.plugins.executor.execute_sequential(HookName::ResponsePost, ctx).await;
        if let Some(overridden_status) = outcome.value.get("statusCode").and_then(|v| v.as_u64()) {
            if let Ok(code) = StatusCode::from_u16(overridden_status as u16) {
                final_status = code;
            }
        }
        if let Some(overridden_body) = outcome.value.get("body").and_then(|v| v.as_str()) {
            body = overridden_body.as_bytes().to_vec();
        }
        if let Some(header_overrides) = outcome.value.get("headers").and_then(|v| v.as_object()) {
            for (name, value) in header_overrides {
                if let (Ok(name), Some(value)) =
                (http::HeaderName::try_from(name.as_str()), value.as_str())
                {
                    if let Ok(value) = HeaderValue::from_str(value) {
                        response_headers.insert(name, value);
                    }
                }
            }
        }
    }

    // Step 10: framing.
    frame_response(state, final_status, response_headers, content_type, body, &request, request_origin.as_deref())
}

fn filter_config(base: &ProxyConfig, effective: &crate::config::model::EffectiveConfig) -> ProxyConfig {
    let mut cfg = base.clone();
    cfg.remove_ads = effective.remove_ads;
    cfg.remove_tracking = effective.remove_tracking;
    cfg
}

fn blocked_response_from(value: &serde_json::Value) -> Option<PipelineResponse> {
    let blocked = value.get("blocked").and_then(|v| v.as_bool()).unwrap_or(false);
    if !blocked {
        return None;
    }
    let status = value
        .get("statusCode")
        .and_then(|v| v.as_u64())
        .and_then(|n| StatusCode::from_u16(n as u16).ok())
        .unwrap_or(StatusCode::NO_CONTENT);
    let body = value.get("body").and_then(|v| v.as_str()).unwrap_or("").as_bytes().to_vec();
    let mut response = PipelineResponse::with_body(status, "text/plain", body);
    if let Some(headers) = value.get("headers").and_then(|v| v.as_object()) {
        for (name, header_value) in headers {
            if let (Ok(name), Some(header_value)) =
            (http::HeaderName::try_from(name.as_str()), header_value.as_str())
            {
                if let Ok(header_value) = HeaderValue::from_str(header_value) {
                    response.headers.insert(name, header_value);
                }
            }
        }
    }
    Some(response)
}

#[allow(clippy::too_many_arguments)]
fn frame_response(
    state: &Arc<AppState>,
    status: StatusCode,
    mut headers: http::HeaderMap,
    content_type: String,
    mut body: Vec<u8>,
    request: &PipelineRequest,
    request_origin: Option<&str>,
) -> PipelineResponse {
    strip_hop_by_hop(&mut headers);

    let client_accepts_gzip = accepts_gzip(request.header_str("accept-encoding"));
    if client_accepts_gzip && is_text_family(&content_type) && body.len() > 1024 {
        if let Ok(compressed) = gzip_compress(&body, state.config.snapshot().compression_level) {
            body = compressed;
            headers.insert(http::header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            headers.insert(http::header::VARY, HeaderValue::from_static("Accept-Encoding"));
        }
    }

    headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_str(&body.len().to_string()).unwrap());
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(http::header::CONTENT_TYPE, value);
    }
    headers.insert(http::header::CONNECTION, HeaderValue::from_static("close"));

    state.metrics.record_bandwidth(body.len());

    let mut response = PipelineResponse { status, headers, body };
    apply_cors(&mut response, request_origin);
    response
}

fn gzip_compress(data: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}
