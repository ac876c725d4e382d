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

use http::StatusCode;
use tracing::Level;

/// The full error taxonomy for a single request's or plugin call's lifetime.
/// Every fallible boundary in the pipeline returns this instead of an
/// ad-hoc string so the framing step and the logging helpers below stay
/// uniform.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("malformed client request: {0}")]
    ClientProtocolError(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream returned a malformed response: {0}")]
    UpstreamProtocolError(String),

    #[error("failed to decompress response body: {0}")]
    DecompressionFailed(String),

    #[error("content transform failed: {0}")]
    TransformFailed(String),

    #[error("cache entry is corrupted: {0}")]
    CacheCorrupted(String),

    #[error("plugin '{plugin}' timed out on hook '{hook}'")]
    PluginTimeout { plugin: String, hook: String },

    #[error("plugin '{plugin}' failed on hook '{hook}': {reason}")]
    PluginFailure { plugin: String, hook: String, reason: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("failed to write portal certificate: {0}")]
    PortalCertWriteFailed(String),
}

impl ProxyError {
    /// The status code used when this error reaches the response-framing
    /// step of the pipeline. A failure here never leaves the client without
    /// a well-formed HTTP response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::ClientProtocolError(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamProtocolError(_) => StatusCode::BAD_GATEWAY,
            ProxyError::DecompressionFailed(_) => StatusCode::BAD_GATEWAY,
            ProxyError::TransformFailed(_) => StatusCode::OK, // pipeline falls back to raw bytes
            ProxyError::CacheCorrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::PluginTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::PluginFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ProxyError::ConfigInvalid(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::PortalCertWriteFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The severity this error should be logged at. Plugin and transform
    /// failures are contained and expected often enough to be `warn`;
    /// anything that can abort the process is `error`.
    pub fn log_level(&self) -> Level {
        match self {
            ProxyError::TransformFailed(_)
            | ProxyError::DecompressionFailed(_)
            | ProxyError::PluginTimeout { .. }
            | ProxyError::PluginFailure { .. } => Level::WARN,
            ProxyError::ConfigInvalid(_) | ProxyError::PortalCertWriteFailed(_) => Level::ERROR,
            _ => Level::WARN,
        }
    }

    /// True for the two kinds that may justify aborting the process instead
    /// of containing the failure to one request.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, ProxyError::ConfigInvalid(_) | ProxyError::PortalCertWriteFailed(_))
    }
}

/// Logs `err` at its own severity with the given request context, then
/// returns it so call sites can still propagate it upward with `?`.
pub fn log_and_continue(err: ProxyError, context: &str) -> ProxyError {
    match err.log_level() {
        Level::ERROR => tracing::error!(context, error = %err, "request failed"),
        Level::WARN => tracing::warn!(context, error = %err, "request failed"),
        _ => tracing::info!(context, error = %err, "request failed"),
    }
    err
}

pub type ProxyResult<T> = Result<T, ProxyError>;
