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

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use validator::Validate;

use crate::config::model::{ClientOverlay, DomainProfile, EffectiveConfig, ProxyConfig};
use crate::error::{ProxyError, ProxyResult};

/// Holds the live global config plus the per-client overlay map. Reads
/// take an `Arc` clone of the current snapshot so in-flight requests never
/// observe a torn update; writes atomically swap the whole snapshot in.
pub struct ConfigStore {
    current: ArcSwap<ProxyConfig>,
    overlays: scc::HashMap<String, ClientOverlay, ahash::RandomState>,
    profiles: scc::HashMap<String, DomainProfile, ahash::RandomState>,
}

impl ConfigStore {
    pub fn new(initial: ProxyConfig) -> Self {
        ConfigStore {
            current: ArcSwap::from_pointee(initial),
            overlays: scc::HashMap::default(),
            profiles: scc::HashMap::default(),
        }
    }

    pub fn load_from_file(path: &Path) -> ProxyResult<ProxyConfig> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            return Ok(ProxyConfig::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| ProxyError::ConfigInvalid(format!("cannot read {}: {e}", path.display())))?;
        let config: ProxyConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ProxyError::ConfigInvalid(format!("invalid yaml in {}: {e}", path.display())))?;
        config
            .validate()
            .map_err(|e| ProxyError::ConfigInvalid(format!("config failed validation: {e}")))?;
        Ok(config)
    }

    /// Takes a fresh reference to the current global snapshot.
    pub fn snapshot(&self) -> Arc<ProxyConfig> {
        self.current.load_full()
    }

    /// Atomically replaces the global config after validating it.
    pub fn replace(&self, new_config: ProxyConfig) -> ProxyResult<()> {
        new_config
            .validate()
            .map_err(|e| ProxyError::ConfigInvalid(format!("config failed validation: {e}")))?;
        self.current.store(Arc::new(new_config));
        Ok(())
    }

    pub fn overlay_for(&self, client_address: &str) -> Option<ClientOverlay> {
        let normalized = normalize_client_address(client_address);
        self.overlays.get(&normalized).map(|entry| entry.get().clone())
    }

    pub fn set_overlay(&self, client_address: &str, overlay: ClientOverlay) {
        let normalized = normalize_client_address(client_address);
        let _ = self.overlays.upsert(normalized, overlay);
    }

    pub fn profile_for(&self, hostname: &str) -> Option<DomainProfile> {
        self.profiles.get(hostname).map(|entry| entry.get().clone())
    }

    pub fn set_profile(&self, hostname: String, profile: DomainProfile) {
        let _ = self.profiles.upsert(hostname, profile);
    }

    /// Resolves the effective, per-request config.
    pub fn resolve_for(&self, client_address: Option<&str>) -> EffectiveConfig {
        let snapshot = self.snapshot();
        let overlay = client_address.and_then(|addr| self.overlay_for(addr));
        EffectiveConfig::resolve(&snapshot, overlay.as_ref())
    }
}

/// `::1` and `::ffff:127.0.0.1` both mean "this machine" on this LAN proxy;
/// normalize them to `127.0.0.1` so overlay lookups don't silently split by
/// address family.
pub fn normalize_client_address(address: &str) -> String {
    match address {
        "::1" | "::ffff:127.0.0.1" => "127.0.0.1".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_loopback_variants() {
        assert_eq!(normalize_client_address("::1"), "127.0.0.1");
        assert_eq!(normalize_client_address("::ffff:127.0.0.1"), "127.0.0.1");
        assert_eq!(normalize_client_address("192.168.1.5"), "192.168.1.5");
    }

    #[test]
    fn overlay_shallow_merges_over_base() {
        let store = ConfigStore::new(ProxyConfig::default());
        store.set_overlay(
            "192.168.1.5",
            ClientOverlay { transform_js: Some(false), ..Default::default() },
        );
        let effective = store.resolve_for(Some("192.168.1.5"));
        assert!(!effective.transform_js);
        assert!(effective.transform_css); // untouched field falls back to base
    }

    #[test]
    fn replace_rejects_invalid_config() {
        let store = ConfigStore::new(ProxyConfig::default());
        let mut bad = ProxyConfig::default();
        bad.compression_level = 99;
        assert!(store.replace(bad).is_err());
    }
}
