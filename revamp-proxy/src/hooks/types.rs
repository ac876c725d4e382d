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

use async_trait::async_trait;
use serde_json::Value;

/// The closed set of hook names the pipeline dispatches at fixed points.
/// Each variant corresponds to one phase of the request lifecycle;
/// the pipeline only enters the executor at all when `has_hooks` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookName {
    RequestPre,
    ResponsePost,
    TransformPre,
    TransformPost,
    FilterDecision,
    ConfigResolution,
    DomainLifecycle,
    CacheGet,
    CacheSet,
    MetricsRecord,
}

impl HookName {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookName::RequestPre => "request:pre",
            HookName::ResponsePost => "response:post",
            HookName::TransformPre => "transform:pre",
            HookName::TransformPost => "transform:post",
            HookName::FilterDecision => "filter:decision",
            HookName::ConfigResolution => "config:resolution",
            HookName::DomainLifecycle => "domain:lifecycle",
            HookName::CacheGet => "cache:get",
            HookName::CacheSet => "cache:set",
            HookName::MetricsRecord => "metrics:record",
        }
    }

    pub const ALL: [HookName; 10] = [
        HookName::RequestPre,
        HookName::ResponsePost,
        HookName::TransformPre,
        HookName::TransformPost,
        HookName::FilterDecision,
        HookName::ConfigResolution,
        HookName::DomainLifecycle,
        HookName::CacheGet,
        HookName::CacheSet,
        HookName::MetricsRecord,
    ];
}

/// The JSON-shaped context a handler receives. Each hook name defines its
/// own conventional keys (documented at the call site in the pipeline); the
/// executor itself is agnostic to the shape.
pub type HookContext = Value;

/// One handler's verdict: a small tagged-variant
/// type composed by the executor's shallow-overlay interpreter.
#[derive(Debug, Clone)]
pub enum HookResult {
    /// Continue the chain, optionally overlaying `overrides` onto the
    /// accumulated value key-by-key.
    Continue { overrides: Option<Value> },
    /// Short-circuit the chain; the pipeline uses `value` directly.
    Stop { value: Value },
    /// Short-circuit with an error; the pipeline treats this as contained
    /// to the handler call.
    StopErr { error: String },
}

impl HookResult {
    pub fn continue_unchanged() -> Self {
        HookResult::Continue { overrides: None }
    }
}

/// Implemented by every plugin-registered handler for a given hook.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn call(&self, ctx: HookContext) -> HookResult;
}

/// A single registration in the priority-ordered list for one hook name.
pub struct HookRegistration {
    pub plugin_id: String,
    pub hook_name: HookName,
    pub handler: Arc<dyn HookHandler>,
    pub priority: i32,
}

/// Shallow-overlays `overrides` onto `base`, key by key: later
/// hook outputs win per-key but untouched keys in `base` survive.
pub fn shallow_merge(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in override_map {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => overrides.clone(),
    }
}
