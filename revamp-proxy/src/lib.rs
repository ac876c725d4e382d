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
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

pub mod cache;
pub mod cert;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod http1;
pub mod http_proxy;
pub mod metrics;
pub mod pipeline;
pub mod plugins;
pub mod portal;
pub mod request;
pub mod socks5;
pub mod tls_client;
pub mod transform;
pub mod upstream;

pub use error::{ProxyError, ProxyResult};
pub use pipeline::{process_request, AppState};
