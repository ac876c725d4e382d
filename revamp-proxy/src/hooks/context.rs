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

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::error::{ProxyError, ProxyResult};
use crate::metrics::Metrics;

/// Every permission a plugin context operation can require. A
/// handler's declared permission set is checked on every call; absence
/// fails that single operation rather than killing the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    RequestRead,
    RequestModify,
    ConfigRead,
    StorageRead,
    StorageWrite,
    CacheRead,
    CacheWrite,
    MetricsRead,
    MetricsWrite,
    NetworkFetch,
    ApiRegister,
}

const MAX_KEYS_PER_PLUGIN: usize = 100;
const MAX_VALUE_BYTES: usize = 1024 * 1024;

/// Internal TLDs and address ranges the permission-gated fetch refuses to
/// reach, checked against the IP resolved *after* DNS resolution to avoid
/// a DNS-rebinding bypass.
const BLOCKED_TLDS: &[&str] = &[".internal", ".local", ".corp", ".lan"];

fn is_private_or_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
            || v4.is_link_local()
            || v4.is_private()
            || v4 == std::net::Ipv4Addr::new(169, 254, 169, 254) // cloud metadata
        }
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Sanitizes a plugin storage key by removing every character outside
/// `[A-Za-z0-9_-]`.
pub fn sanitize_storage_key(key: &str) -> String {
    key.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-').collect()
}

/// Per-plugin JSON storage rooted at `<data_dir>/plugins/<plugin_id>/`, one
/// file per key, written atomically via write-to-temp-then-rename.
pub struct PluginStorage {
    root: PathBuf,
}

impl PluginStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        PluginStorage { root: data_dir.into() }
    }

    fn plugin_dir(&self, plugin_id: &str) -> PathBuf {
        self.root.join("plugins").join(plugin_id)
    }

    pub async fn get(&self, plugin_id: &str, key: &str) -> ProxyResult<Option<Value>> {
        let path = self.plugin_dir(plugin_id).join(format!("{}.json", sanitize_storage_key(key)));
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| ProxyError::CacheCorrupted(format!("corrupt plugin storage file: {e}")))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProxyError::CacheCorrupted(format!("failed to read plugin storage: {e}"))),
        }
    }

    pub async fn set(&self, plugin_id: &str, key: &str, value: &Value) -> ProxyResult<()> {
        let serialized = serde_json::to_vec(value)
            .map_err(|e| ProxyError::ConfigInvalid(format!("value is not serializable: {e}")))?;
        if serialized.len() > MAX_VALUE_BYTES {
            return Err(ProxyError::PermissionDenied(format!(
                        "plugin storage value exceeds {MAX_VALUE_BYTES} bytes"
            )));
        }

        let dir = self.plugin_dir(plugin_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ProxyError::CacheCorrupted(format!("failed to create plugin storage dir: {e}")))?;

        if self.key_count(plugin_id).await >= MAX_KEYS_PER_PLUGIN
        && !self.exists(plugin_id, key).await
        {
            return Err(ProxyError::PermissionDenied(format!(
                        "plugin '{plugin_id}' has reached the {MAX_KEYS_PER_PLUGIN}-key storage limit"
            )));
        }

        let sanitized = sanitize_storage_key(key);
        let final_path = dir.join(format!("{sanitized}.json"));
        let tmp_path = dir.join(format!("{sanitized}.json.tmp"));

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| ProxyError::CacheCorrupted(format!("failed to create temp storage file: {e}")))?;
        file.write_all(&serialized)
            .await
            .map_err(|e| ProxyError::CacheCorrupted(format!("failed to write temp storage file: {e}")))?;
        file.flush().await.ok();
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| ProxyError::CacheCorrupted(format!("failed to rename temp storage file: {e}")))?;
        Ok(())
    }

    async fn exists(&self, plugin_id: &str, key: &str) -> bool {
        let path = self.plugin_dir(plugin_id).join(format!("{}.json", sanitize_storage_key(key)));
        tokio::fs::try_exists(&path).await.unwrap_or(false)
    }

    async fn key_count(&self, plugin_id: &str) -> usize {
        let dir = self.plugin_dir(plugin_id);
        match tokio::fs::read_dir(&dir).await {
            Ok(mut entries) => {
                let mut count = 0;
                while let Ok(Some(_)) = entries.next_entry().await {
                    count += 1;
                }
                count
            }
            Err(_) => 0,
        }
    }
}

/// The permission-gated sandbox handed to plugin handlers. Every
/// accessor checks `permissions` before touching config, storage, cache,
/// metrics, or the network.
pub struct PluginContext {
    pub plugin_id: String,
    permissions: HashSet<Permission>,
    storage: Arc<PluginStorage>,
    metrics: Arc<Metrics>,
    fetch_client: reqwest::Client,
}

impl PluginContext {
    pub fn new(
        plugin_id: impl Into<String>,
        permissions: HashSet<Permission>,
        storage: Arc<PluginStorage>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let fetch_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("plugin fetch client builds with default TLS config");
        PluginContext { plugin_id: plugin_id.into(), permissions, storage, metrics, fetch_client }
    }

    fn require(&self, permission: Permission) -> ProxyResult<()> {
        if self.permissions.contains(&permission) {
            Ok(())
        } else {
            Err(ProxyError::PermissionDenied(format!(
                        "plugin '{}' lacks permission {:?}",
                        self.plugin_id, permission
            )))
        }
    }

    pub async fn storage_get(&self, key: &str) -> ProxyResult<Option<Value>> {
        self.require(Permission::StorageRead)?;
        self.storage.get(&self.plugin_id, key).await
    }

    pub async fn storage_set(&self, key: &str, value: &Value) -> ProxyResult<()> {
        self.require(Permission::StorageWrite)?;
        self.storage.set(&self.plugin_id, key, value).await
    }

    pub fn record_metric(&self, name: &str, value: i64) -> ProxyResult<()> {
        self.require(Permission::MetricsWrite)?;
        self.metrics.record_plugin_metric(&self.plugin_id, name, value);
        Ok(())
    }

    /// Permission-gated outbound fetch: blocks localhost, link-local,
    /// cloud-metadata, and private-range IPs (checked post-resolution to
    /// defeat DNS rebinding), internal TLDs, and non-http(s) schemes.
    pub async fn fetch(&self, url: &str) -> ProxyResult<Vec<u8>> {
        self.require(Permission::NetworkFetch)?;

        let parsed = url::Url::parse(url)
            .map_err(|e| ProxyError::PermissionDenied(format!("invalid plugin fetch url: {e}")))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ProxyError::PermissionDenied(format!(
                        "plugin fetch scheme '{}' is not allowed",
                        parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ProxyError::PermissionDenied("plugin fetch url has no host".into()))?;
        if BLOCKED_TLDS.iter().any(|tld| host.ends_with(tld)) {
            return Err(ProxyError::PermissionDenied(format!("plugin fetch host '{host}' uses a blocked TLD")));
        }

        let response = self
            .fetch_client
            .get(url)
            .send()
            .await
            .map_err(|e| ProxyError::PermissionDenied(format!("plugin fetch failed: {e}")))?;

        if let Some(remote) = response.remote_addr() {
            if is_private_or_internal(remote.ip()) {
                return Err(ProxyError::PermissionDenied(format!(
                            "plugin fetch target {} resolves to a blocked address range",
                            remote.ip()
                )));
            }
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ProxyError::PermissionDenied(format!("plugin fetch body read failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_storage_key_strips_disallowed_characters() {
        assert_eq!(sanitize_storage_key("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_storage_key("my-key_1"), "my-key_1");
    }

    #[tokio::test]
    async fn storage_round_trips_and_enforces_key_cap() {
        let dir = tempfile::tempdir().unwrap();
        let storage = PluginStorage::new(dir.path());
        storage.set("plugin-a", "k", &serde_json::json!({"x": 1})).await.unwrap();
        let got = storage.get("plugin-a", "k").await.unwrap();
        assert_eq!(got, Some(serde_json::json!({"x": 1})));

        for i in 0..MAX_KEYS_PER_PLUGIN {
            storage.set("plugin-b", &format!("k{i}"), &serde_json::json!(i)).await.unwrap();
        }
        let overflow = storage.set("plugin-b", "k-overflow", &serde_json::json!(1)).await;
        assert!(overflow.is_err());
    }

    #[tokio::test]
    async fn fetch_without_permission_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(PluginStorage::new(dir.path()));
        let metrics = Arc::new(Metrics::new());
        let ctx = PluginContext::new("p", HashSet::new(), storage, metrics);
        let result = ctx.fetch("https://example.com").await;
        assert!(matches!(result, Err(ProxyError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn fetch_blocks_internal_tlds() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(PluginStorage::new(dir.path()));
        let metrics = Arc::new(Metrics::new());
        let mut perms = HashSet::new();
        perms.insert(Permission::NetworkFetch);
        let ctx = PluginContext::new("p", perms, storage, metrics);
        let result = ctx.fetch("http://service.internal/x").await;
        assert!(matches!(result, Err(ProxyError::PermissionDenied(_))));
    }
}
