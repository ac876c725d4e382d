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

use parking_lot::RwLock;

use crate::hooks::types::{HookHandler, HookName, HookRegistration};

/// Global registry of hook registrations. Mutated rarely (plugin
/// load/unload); read once per request. A single `RwLock` is enough: reads
/// vastly outnumber writes and never block each other.
#[derive(Default)]
pub struct HookRegistry {
    lists: RwLock<ahash::HashMap<&'static str, Vec<Arc<HookRegistration>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        HookRegistry { lists: RwLock::new(ahash::HashMap::default()) }
    }

    /// Inserts a registration, then re-sorts that hook's list by descending
    /// priority with a stable sort so equal-priority registrations keep
    /// their insertion order.
    pub fn register(
        &self,
        plugin_id: impl Into<String>,
        hook_name: HookName,
        priority: i32,
        handler: Arc<dyn HookHandler>,
    ) {
        let registration =
            Arc::new(HookRegistration { plugin_id: plugin_id.into(), hook_name, handler, priority });
        let mut lists = self.lists.write();
        let list = lists.entry(hook_name.as_str()).or_default();
        list.push(registration);
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn unregister_plugin(&self, plugin_id: &str) {
        let mut lists = self.lists.write();
        for list in lists.values_mut() {
            list.retain(|r| r.plugin_id != plugin_id);
        }
    }

    pub fn has_hooks(&self, hook_name: HookName) -> bool {
        self.lists.read().get(hook_name.as_str()).map(|l| !l.is_empty()).unwrap_or(false)
    }

    pub fn hook_count(&self, hook_name: HookName) -> usize {
        self.lists.read().get(hook_name.as_str()).map(|l| l.len()).unwrap_or(0)
    }

    pub fn handlers_for(&self, hook_name: HookName) -> Vec<Arc<HookRegistration>> {
        self.lists.read().get(hook_name.as_str()).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::types::HookResult;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl HookHandler for Noop {
        async fn call(&self, _ctx: serde_json::Value) -> HookResult {
            HookResult::continue_unchanged()
        }
    }

    #[test]
    fn sorts_by_descending_priority_stable_on_ties() {
        let registry = HookRegistry::new();
        registry.register("a", HookName::RequestPre, 10, Arc::new(Noop));
        registry.register("b", HookName::RequestPre, 100, Arc::new(Noop));
        registry.register("c", HookName::RequestPre, 100, Arc::new(Noop));
        let handlers = registry.handlers_for(HookName::RequestPre);
        let ids: Vec<&str> = handlers.iter().map(|h| h.plugin_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn has_hooks_and_hook_count_reflect_registrations() {
        let registry = HookRegistry::new();
        assert!(!registry.has_hooks(HookName::ResponsePost));
        registry.register("a", HookName::ResponsePost, 1, Arc::new(Noop));
        assert!(registry.has_hooks(HookName::ResponsePost));
        assert_eq!(registry.hook_count(HookName::ResponsePost), 1);
    }

    #[test]
    fn unregister_plugin_removes_across_all_hooks() {
        let registry = HookRegistry::new();
        registry.register("a", HookName::RequestPre, 1, Arc::new(Noop));
        registry.register("a", HookName::ResponsePost, 1, Arc::new(Noop));
        registry.unregister_plugin("a");
        assert!(!registry.has_hooks(HookName::RequestPre));
        assert!(!registry.has_hooks(HookName::ResponsePost));
    }
}
