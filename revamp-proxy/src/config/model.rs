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

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

fn default_true() -> bool {
    true
}

fn default_socks_port() -> u16 {
    1080
}

fn default_http_port() -> u16 {
    8080
}

fn default_portal_port() -> u16 {
    8888
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_compression_level() -> u32 {
    6
}

fn default_cache_dir() -> String {
    "./data/cache".to_string()
}

fn default_cert_dir() -> String {
    "./data/certs".to_string()
}

fn default_plugin_dir() -> String {
    "./data/plugins".to_string()
}

fn default_json_log_dir() -> String {
    "./data/logs".to_string()
}

/// The immutable global configuration snapshot. Created at startup from
/// defaults plus an optional file override, and atomically replaced whenever
/// the runtime config API accepts a new one.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProxyConfig {
    #[serde(default = "default_socks_port")]
    pub socks_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_portal_port")]
    pub portal_port: u16,
    #[serde(default = "default_bind_address")]
    #[validate(length(min = 1))]
    pub bind_address: String,

    #[serde(default = "default_true")]
    pub transform_js: bool,
    #[serde(default = "default_true")]
    pub transform_css: bool,
    #[serde(default = "default_true")]
    pub transform_html: bool,
    #[serde(default)]
    pub bundle_es_modules: bool,
    #[serde(default = "default_true")]
    pub remove_ads: bool,
    #[serde(default = "default_true")]
    pub remove_tracking: bool,
    #[serde(default = "default_true")]
    pub inject_polyfills: bool,
    #[serde(default)]
    pub spoof_user_agent: bool,
    #[serde(default)]
    pub spoof_user_agent_in_js: bool,
    #[serde(default)]
    pub emulate_service_workers: bool,
    #[serde(default)]
    pub remote_service_workers: bool,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub log_json_requests: bool,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_compression_level")]
    #[validate(range(min = 0, max = 9))]
    pub compression_level: u32,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_cert_dir")]
    pub cert_dir: String,
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: String,
    #[serde(default = "default_json_log_dir")]
    pub json_log_dir: String,

    #[serde(default)]
    pub ad_domains: Vec<String>,
    #[serde(default)]
    pub tracking_domains: Vec<String>,
    #[serde(default)]
    pub tracking_urls: Vec<String>,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub domain_profiles: HashMap<String, DomainProfile>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty document always deserializes to defaults")
    }
}

/// A per-client partial override. Only the fields a client has
/// customized are `Some`; everything else falls back to the global
/// snapshot at resolution time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientOverlay {
    pub transform_js: Option<bool>,
    pub transform_css: Option<bool>,
    pub transform_html: Option<bool>,
    pub remove_ads: Option<bool>,
    pub remove_tracking: Option<bool>,
    pub cache_enabled: Option<bool>,
    pub spoof_user_agent: Option<bool>,
}

/// One rule belonging to a domain profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRule {
    pub enabled: bool,
    pub action: RuleAction,
    pub pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Block,
    Allow,
}

/// User-supplied per-hostname customization of the filter engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainProfile {
    #[serde(default)]
    pub script_patterns: Vec<ProfileRule>,
    #[serde(default)]
    pub css_selectors: Vec<ProfileRule>,
    #[serde(default)]
    pub domain_rules: Vec<ProfileRule>,
    #[serde(default)]
    pub url_patterns: Vec<ProfileRule>,
}

/// The fully resolved configuration for one request: global snapshot with
/// the client overlay (if any) merged in.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub base: ProxyConfig,
    pub transform_js: bool,
    pub transform_css: bool,
    pub transform_html: bool,
    pub remove_ads: bool,
    pub remove_tracking: bool,
    pub cache_enabled: bool,
    pub spoof_user_agent: bool,
}

impl EffectiveConfig {
    pub fn resolve(base: &ProxyConfig, overlay: Option<&ClientOverlay>) -> Self {
        let overlay = overlay.cloned().unwrap_or_default();
        EffectiveConfig {
            transform_js: overlay.transform_js.unwrap_or(base.transform_js),
            transform_css: overlay.transform_css.unwrap_or(base.transform_css),
            transform_html: overlay.transform_html.unwrap_or(base.transform_html),
            remove_ads: overlay.remove_ads.unwrap_or(base.remove_ads),
            remove_tracking: overlay.remove_tracking.unwrap_or(base.remove_tracking),
            cache_enabled: overlay.cache_enabled.unwrap_or(base.cache_enabled),
            spoof_user_agent: overlay.spoof_user_agent.unwrap_or(base.spoof_user_agent),
            base: base.clone(),
        }
    }

    /// An 8-hex-digit fingerprint contribution distinguishing cache entries
    /// produced under different effective configs.
    pub fn config_hash_prefix(&self) -> String {
        use sha2::{Digest, Sha256};
        let serialized = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&serialized);
        hex::encode(&digest[..4])
    }
}

impl serde::Serialize for EffectiveConfig {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        // `base` carries every option the client overlay doesn't resolve
        // (compression level, TTL, polyfill/service-worker toggles, the
        // ad/tracking lists, ...); it must be included alongside the
        // resolved fields below so the fingerprint in `config_hash_prefix`
        // changes whenever *any* config option changes, not just the six
        // the overlay can override.
        let mut s = serializer.serialize_struct("EffectiveConfig", 7)?;
        s.serialize_field("base", &self.base)?;
        s.serialize_field("transform_js", &self.transform_js)?;
        s.serialize_field("transform_css", &self.transform_css)?;
        s.serialize_field("transform_html", &self.transform_html)?;
        s.serialize_field("remove_ads", &self.remove_ads)?;
        s.serialize_field("remove_tracking", &self.remove_tracking)?;
        s.serialize_field("spoof_user_agent", &self.spoof_user_agent)?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_none_falls_back_to_base_entirely() {
        let base = ProxyConfig::default();
        let effective = EffectiveConfig::resolve(&base, None);
        assert_eq!(effective.transform_js, base.transform_js);
        assert_eq!(effective.remove_ads, base.remove_ads);
    }

    #[test]
    fn config_hash_prefix_changes_with_any_toggled_option() {
        let base = ProxyConfig::default();
        let baseline = EffectiveConfig::resolve(&base, None);
        let overlay = ClientOverlay { transform_js: Some(!base.transform_js), ..Default::default() };
        let toggled = EffectiveConfig::resolve(&base, Some(&overlay));
        assert_ne!(baseline.config_hash_prefix(), toggled.config_hash_prefix());
    }

    /// `bundle_es_modules` has no `ClientOverlay` field — it only ever
    /// changes via `base`. The fingerprint must still react, or a client
    /// toggling it would be served the previous config's cached transform.
    #[test]
    fn config_hash_prefix_changes_with_a_base_only_option() {
        let base = ProxyConfig::default();
        let baseline = EffectiveConfig::resolve(&base, None);

        let mut other_base = base.clone();
        other_base.bundle_es_modules = !base.bundle_es_modules;
        let toggled = EffectiveConfig::resolve(&other_base, None);

        assert_ne!(baseline.config_hash_prefix(), toggled.config_hash_prefix());
    }

    #[test]
    fn config_hash_prefix_is_stable_for_identical_config() {
        let base = ProxyConfig::default();
        let a = EffectiveConfig::resolve(&base, None);
        let b = EffectiveConfig::resolve(&base, None);
        assert_eq!(a.config_hash_prefix(), b.config_hash_prefix());
    }
}
