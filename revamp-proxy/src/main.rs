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

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use revamp_core::{wait_for_shutdown_signal, Service};
use revamp_proxy::cache::ContentCache;
use revamp_proxy::cert::CertificateAuthority;
use revamp_proxy::config::ConfigStore;
use revamp_proxy::http_proxy::HttpProxyService;
use revamp_proxy::metrics::Metrics;
use revamp_proxy::plugins::PluginManager;
use revamp_proxy::portal::PortalService;
use revamp_proxy::socks5::Socks5Service;
use revamp_proxy::transform::TransformerRegistry;
use revamp_proxy::upstream::UpstreamClient;
use revamp_proxy::AppState;

/// A transparent LAN interception proxy: SOCKS5 and HTTP ingresses that
/// MITM TLS with a locally minted CA, cache and optionally transform
/// response bodies, and expose a plugin hook system.
#[derive(Parser, Debug)]
#[command(name = "revamp-proxyd", version)]
struct Cli {
    /// Path to the YAML config file. Missing file falls back to defaults.
    #[arg(long, default_value = "./revamp.yaml")]
    config: PathBuf,

    /// Override the config's cache directory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Override the config's certificate-authority directory.
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// Override the config's plugin data directory.
    #[arg(long)]
    plugin_dir: Option<PathBuf>,

    /// Increase log verbosity; repeat for more (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(cli))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "revamp_proxy=info,revamp_core=info",
        1 => "revamp_proxy=debug,revamp_core=debug",
        _ => "revamp_proxy=trace,revamp_core=trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

async fn run(cli: Cli) -> ExitCode {
    dotenv::dotenv().ok();

    let proxy_config = match ConfigStore::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let cache_dir = cli.cache_dir.unwrap_or_else(|| PathBuf::from(&proxy_config.cache_dir));
    let cert_dir = cli.cert_dir.unwrap_or_else(|| PathBuf::from(&proxy_config.cert_dir));
    let plugin_dir = cli.plugin_dir.unwrap_or_else(|| PathBuf::from(&proxy_config.plugin_dir));

    let cert_authority = match CertificateAuthority::ensure_root(&cert_dir) {
        Ok(ca) => ca,
        Err(e) => {
            tracing::error!(error = %e, "failed to establish certificate authority");
            return ExitCode::FAILURE;
        }
    };

    let upstream = match UpstreamClient::new() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build upstream http client");
            return ExitCode::FAILURE;
        }
    };

    let metrics = Arc::new(Metrics::new());
    let bind_address = proxy_config.bind_address.clone();
    let socks_port = proxy_config.socks_port;
    let http_port = proxy_config.http_port;
    let portal_port = proxy_config.portal_port;

    let state = Arc::new(AppState {
        config: ConfigStore::new(proxy_config),
        cache: ContentCache::new(cache_dir),
        cert_authority,
        upstream,
        plugins: PluginManager::new(plugin_dir, metrics.clone()),
        transformers: TransformerRegistry::new(),
        metrics,
    });

    let mut socks_service = Service::new("socks5", Socks5Service::new(state.clone()));
    socks_service.add_tcp_address(format!("{bind_address}:{socks_port}"));

    let mut http_service = Service::new("http-proxy", HttpProxyService::new(state.clone()));
    http_service.add_tcp_address(format!("{bind_address}:{http_port}"));

    let mut portal_service = Service::new("portal", PortalService::new(state.clone()));
    portal_service.add_tcp_address(format!("{bind_address}:{portal_port}"));

    tracing::info!(bind_address, socks_port, http_port, portal_port, "starting revamp-proxyd");

    tokio::select! {
        _ = socks_service.start_service() => {}
        _ = http_service.start_service() => {}
        _ = portal_service.start_service() => {}
        reason = wait_for_shutdown_signal() => {
            tracing::info!(?reason, "shutting down");
        }
    }

    ExitCode::SUCCESS
}
