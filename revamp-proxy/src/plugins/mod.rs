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
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::ProxyResult;
use crate::hooks::context::{Permission, PluginContext, PluginStorage};
use crate::hooks::executor::{HookExecutor, DEFAULT_HOOK_TIMEOUT};
use crate::hooks::registry::HookRegistry;
use crate::hooks::stats::HookStatsEntry;
use crate::hooks::types::HookName;
use crate::metrics::Metrics;

/// A plugin-registered HTTP endpoint, mounted under
/// `/__revamp__/plugins/{pluginId}/{path}`.
#[async_trait]
pub trait PluginEndpoint: Send + Sync {
    async fn handle(&self, ctx: &PluginContext, sub_path: &str, body: &[u8]) -> ProxyResult<Vec<u8>>;
}

struct EndpointRegistration {
    plugin_id: String,
    mount_path: String,
    handler: Arc<dyn PluginEndpoint>,
}

/// Owns everything the plugin system needs that isn't the hook dispatch
/// itself: declared permissions, storage, and the per-plugin endpoint
/// registry the `api:register` permission gates.
pub struct PluginManager {
    pub executor: HookExecutor,
    storage: Arc<PluginStorage>,
    metrics: Arc<Metrics>,
    permissions: RwLock<ahash::HashMap<String, HashSet<Permission>>>,
    endpoints: RwLock<Vec<EndpointRegistration>>,
}

impl PluginManager {
    pub fn new(data_dir: impl Into<PathBuf>, metrics: Arc<Metrics>) -> Self {
        PluginManager {
            executor: HookExecutor::new(HookRegistry::new()).with_timeout(DEFAULT_HOOK_TIMEOUT),
            storage: Arc::new(PluginStorage::new(data_dir)),
            metrics,
            permissions: RwLock::new(ahash::HashMap::default()),
            endpoints: RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &HookRegistry {
        self.executor.registry()
    }

    pub fn declare_permissions(&self, plugin_id: impl Into<String>, permissions: HashSet<Permission>) {
        self.permissions.write().insert(plugin_id.into(), permissions);
    }

    fn permissions_for(&self, plugin_id: &str) -> HashSet<Permission> {
        self.permissions.read().get(plugin_id).cloned().unwrap_or_default()
    }

    pub fn context_for(&self, plugin_id: &str) -> PluginContext {
        PluginContext::new(plugin_id, self.permissions_for(plugin_id), self.storage.clone(), self.metrics.clone())
    }

    /// Registers an endpoint under the plugin's mount, gated by the
    /// `api:register` permission.
    pub fn register_endpoint(
        &self,
        plugin_id: impl Into<String>,
        mount_path: impl Into<String>,
        handler: Arc<dyn PluginEndpoint>,
    ) -> ProxyResult<()> {
        let plugin_id = plugin_id.into();
        if !self.permissions_for(&plugin_id).contains(&Permission::ApiRegister) {
            return Err(crate::error::ProxyError::PermissionDenied(format!(
                "plugin '{plugin_id}' lacks permission ApiRegister"
            )));
        }
        self.endpoints.write().push(EndpointRegistration {
            plugin_id,
            mount_path: mount_path.into(),
            handler,
        });
        Ok(())
    }

    /// Dispatches `/__revamp__/plugins/{pluginId}/{path}` to the matching registered endpoint, if any.
    pub async fn dispatch_endpoint(
        &self,
        plugin_id: &str,
        sub_path: &str,
        body: &[u8],
    ) -> Option<ProxyResult<Vec<u8>>> {
        let endpoints = self.endpoints.read();
        let matched = endpoints
            .iter()
            .find(|e| e.plugin_id == plugin_id && sub_path.starts_with(e.mount_path.as_str()))?;
        let handler = matched.handler.clone();
        let ctx = self.context_for(plugin_id);
        drop(endpoints);
        Some(handler.handle(&ctx, sub_path, body).await)
    }

    pub fn unregister(&self, plugin_id: &str) {
        self.executor.registry().unregister_plugin(plugin_id);
        self.permissions.write().remove(plugin_id);
        self.endpoints.write().retain(|e| e.plugin_id != plugin_id);
    }

    /// `resetStats(pluginId?)` / `getPluginStats` semantics: a
    /// plugin with no recorded executions after a reset is reported as
    /// absent, not as a zeroed entry, matching the testable property
    /// "resetStats(id) then getPluginStats(id) returns nothing."
    pub fn plugin_stats(&self, plugin_id: &str) -> Option<HookStatsEntry> {
        let stats = self.executor.stats().get(plugin_id)?;
        let totals = stats.totals();
        if totals.executions == 0 {
            None
        } else {
            Some(totals)
        }
    }

    pub fn all_plugin_stats(&self) -> Vec<(String, HookStatsEntry)> {
        self.executor
            .stats()
            .get_all()
            .into_iter()
            .map(|(id, stats)| (id, stats.totals()))
            .filter(|(_, totals)| totals.executions > 0)
            .collect()
    }

    pub fn reset_stats(&self, plugin_id: Option<&str>) {
        self.executor.stats().reset(plugin_id);
    }

    pub fn has_hooks(&self, hook_name: HookName) -> bool {
        self.executor.has_hooks(hook_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoEndpoint;

    #[async_trait]
    impl PluginEndpoint for EchoEndpoint {
        async fn handle(&self, _ctx: &PluginContext, sub_path: &str, body: &[u8]) -> ProxyResult<Vec<u8>> {
            let mut out = sub_path.as_bytes().to_vec();
            out.extend_from_slice(body);
            Ok(out)
        }
    }

    fn manager() -> PluginManager {
        let dir = tempfile::tempdir().unwrap();
        PluginManager::new(dir.path(), Arc::new(Metrics::new()))
    }

    #[test]
    fn register_endpoint_requires_api_register_permission() {
        let mgr = manager();
        let result = mgr.register_endpoint("p", "/hello", Arc::new(EchoEndpoint));
        assert!(result.is_err());

        mgr.declare_permissions("p", HashSet::from([Permission::ApiRegister]));
        assert!(mgr.register_endpoint("p", "/hello", Arc::new(EchoEndpoint)).is_ok());
    }

    #[tokio::test]
    async fn dispatch_endpoint_matches_by_plugin_and_mount_prefix() {
        let mgr = manager();
        mgr.declare_permissions("p", HashSet::from([Permission::ApiRegister]));
        mgr.register_endpoint("p", "/hello", Arc::new(EchoEndpoint)).unwrap();

        let result = mgr.dispatch_endpoint("p", "/hello/world", b"!").await;
        assert_eq!(result.unwrap().unwrap(), b"/hello/world!".to_vec());

        assert!(mgr.dispatch_endpoint("p", "/other", b"").await.is_none());
        assert!(mgr.dispatch_endpoint("other-plugin", "/hello", b"").await.is_none());
    }

    #[test]
    fn unregister_clears_permissions_and_endpoints() {
        let mgr = manager();
        mgr.declare_permissions("p", HashSet::from([Permission::ApiRegister]));
        mgr.register_endpoint("p", "/hello", Arc::new(EchoEndpoint)).unwrap();

        mgr.unregister("p");

        assert!(mgr.register_endpoint("p", "/hello", Arc::new(EchoEndpoint)).is_err());
        assert_eq!(mgr.endpoints.read().len(), 0);
    }

    #[test]
    fn plugin_stats_reports_absent_until_a_hook_executes() {
        let mgr = manager();
        assert!(mgr.plugin_stats("p").is_none());
        assert_eq!(mgr.all_plugin_stats(), Vec::new());
    }

    #[test]
    fn has_hooks_reflects_the_registry() {
        let mgr = manager();
        assert!(!mgr.has_hooks(HookName::RequestPre));
    }
}
