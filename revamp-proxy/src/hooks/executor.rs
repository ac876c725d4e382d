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

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use serde_json::Value;

use crate::hooks::registry::HookRegistry;
use crate::hooks::stats::{Outcome, StatsRegistry};
use crate::hooks::types::{shallow_merge, HookContext, HookName, HookResult};

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_millis(5000);

/// The outcome of running a hook chain: the accumulated value
/// after every handler ran (or the chain was short-circuited), plus which
/// plugin stopped it and how many handlers actually executed.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub value: Value,
    pub stopped_by: Option<String>,
    pub stop_error: Option<String>,
    pub hooks_executed: usize,
}

impl ChainOutcome {
    pub fn stopped(&self) -> bool {
        self.stopped_by.is_some()
    }
}

/// Composes the registry and the per-plugin statistics into the dispatcher
/// the pipeline calls at each named phase.
pub struct HookExecutor {
    registry: HookRegistry,
    stats: StatsRegistry,
    timeout: Duration,
}

impl HookExecutor {
    pub fn new(registry: HookRegistry) -> Self {
        HookExecutor { registry, stats: StatsRegistry::new(), timeout: DEFAULT_HOOK_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &StatsRegistry {
        &self.stats
    }

    pub fn has_hooks(&self, hook_name: HookName) -> bool {
        self.registry.has_hooks(hook_name)
    }

    pub fn hook_count(&self, hook_name: HookName) -> usize {
        self.registry.hook_count(hook_name)
    }

    /// Runs the priority-ordered chain sequentially, short-circuiting on
    /// `Stop`/`StopErr`. On handler panic or timeout, records the failure
    /// and proceeds with the accumulated value unchanged.
    pub async fn execute_sequential(&self, hook_name: HookName, initial: HookContext) -> ChainOutcome {
        let handlers = self.registry.handlers_for(hook_name);
        let mut value = initial;
        let mut executed = 0usize;

        for registration in handlers {
            let stats = self.stats.stats_for(&registration.plugin_id);
            let started = Instant::now();
            let outcome = tokio::time::timeout(
                self.timeout,
                AssertUnwindSafe(registration.handler.call(value.clone())).catch_unwind(),
            )
                .await;
            executed += 1;

            match outcome {
                Err(_elapsed) => {
                    stats.record(hook_name, Outcome::Timeout, self.timeout, now_ms());
                    tracing::warn!(
                        plugin = %registration.plugin_id,
                        hook = hook_name.as_str(),
                        "hook handler timed out, continuing with accumulated value"
                    );
                    continue;
                }
                Ok(Err(_panic)) => {
                    stats.record(hook_name, Outcome::Failure, started.elapsed(), now_ms());
                    tracing::warn!(
                        plugin = %registration.plugin_id,
                        hook = hook_name.as_str(),
                        "hook handler panicked, continuing with accumulated value"
                    );
                    continue;
                }
                Ok(Ok(result)) => match result {
                    HookResult::Continue { overrides } => {
                        stats.record(hook_name, Outcome::Success, started.elapsed(), now_ms());
                        if let Some(overrides) = overrides {
                            value = shallow_merge(&value, &overrides);
                        }
                    }
                    HookResult::Stop { value: stop_value } => {
                        stats.record(hook_name, Outcome::Success, started.elapsed(), now_ms());
                        return ChainOutcome {
                            value: shallow_merge(&value, &stop_value),
                            stopped_by: Some(registration.plugin_id.clone()),
                            stop_error: None,
                            hooks_executed: executed,
                        };
                    }
                    HookResult::StopErr { error } => {
                        stats.record(hook_name, Outcome::Failure, started.elapsed(), now_ms());
                        return ChainOutcome {
                            value,
                            stopped_by: Some(registration.plugin_id.clone()),
                            stop_error: Some(error),
                            hooks_executed: executed,
                        };
                    }
                },
            }
        }

        ChainOutcome { value, stopped_by: None, stop_error: None, hooks_executed: executed }
    }

    /// Runs every registered handler concurrently, each still under its own
    /// timeout; never short-circuits. Returns one
    /// result per handler in registration (priority) order.
    pub async fn execute_parallel(
        &self,
        hook_name: HookName,
        ctx: HookContext,
    ) -> Vec<(String, Result<HookResult, String>)> {
        let handlers = self.registry.handlers_for(hook_name);
        let futures = handlers.into_iter().map(|registration| {
                let ctx = ctx.clone();
                let stats = self.stats.stats_for(&registration.plugin_id);
                let timeout = self.timeout;
                async move {
                    let started = Instant::now();
                    let outcome = tokio::time::timeout(
                        timeout,
                        AssertUnwindSafe(registration.handler.call(ctx)).catch_unwind(),
                    )
                        .await;
                    let result = match outcome {
                        Err(_elapsed) => {
                            stats.record(hook_name, Outcome::Timeout, timeout, now_ms());
                            Err(format!("plugin '{}' timed out on hook '{}'", registration.plugin_id, hook_name.as_str()))
                        }
                        Ok(Err(_panic)) => {
                            stats.record(hook_name, Outcome::Failure, started.elapsed(), now_ms());
                            Err(format!("plugin '{}' panicked on hook '{}'", registration.plugin_id, hook_name.as_str()))
                        }
                        Ok(Ok(HookResult::StopErr { error })) => {
                            stats.record(hook_name, Outcome::Failure, started.elapsed(), now_ms());
                            Err(error)
                        }
                        Ok(Ok(result)) => {
                            stats.record(hook_name, Outcome::Success, started.elapsed(), now_ms());
                            Ok(result)
                        }
                    };
                    (registration.plugin_id.clone(), result)
                }
        });
        futures::future::join_all(futures).await
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::types::HookHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Blocker { host_needle: &'static str }

    #[async_trait]
    impl HookHandler for Blocker {
        async fn call(&self, ctx: HookContext) -> HookResult {
            let host = ctx.get("host").and_then(|v| v.as_str()).unwrap_or("");
            if host.contains(self.host_needle) {
                HookResult::Stop { value: json!({"blocked": true, "statusCode": 403, "body": "Blocked"}) }
            } else {
                HookResult::continue_unchanged()
            }
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl HookHandler for SlowHandler {
        async fn call(&self, _ctx: HookContext) -> HookResult {
            tokio::time::sleep(Duration::from_secs(10)).await;
            HookResult::continue_unchanged()
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl HookHandler for PanicHandler {
        async fn call(&self, _ctx: HookContext) -> HookResult {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn ad_blocker_stops_chain_for_matching_host() {
        let registry = HookRegistry::new();
        registry.register(
            "ad-blocker",
            HookName::RequestPre,
            100,
            Arc::new(Blocker { host_needle: "ads.example.com" }),
        );
        let executor = HookExecutor::new(registry);

        let blocked = executor.execute_sequential(HookName::RequestPre, json!({"host": "ads.example.com"})).await;
        assert!(blocked.stopped());
        assert_eq!(blocked.hooks_executed, 1);
        assert_eq!(blocked.value["blocked"], json!(true));

        let passthrough =
        executor.execute_sequential(HookName::RequestPre, json!({"host": "api.example.com"})).await;
        assert!(!passthrough.stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_recorded_and_chain_continues() {
        let registry = HookRegistry::new();
        registry.register("slow", HookName::RequestPre, 1, Arc::new(SlowHandler));
        let executor = HookExecutor::new(registry).with_timeout(Duration::from_millis(10));
        let outcome = executor.execute_sequential(HookName::RequestPre, json!({})).await;
        assert!(!outcome.stopped());
        let stats = executor.stats.get("slow").unwrap();
        assert_eq!(stats.totals().timeouts, 1);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_abort_the_chain() {
        let registry = HookRegistry::new();
        registry.register("bad", HookName::RequestPre, 10, Arc::new(PanicHandler));
        registry.register("good", HookName::RequestPre, 1, Arc::new(Blocker { host_needle: "nowhere" }));
        let executor = HookExecutor::new(registry);
        let outcome = executor.execute_sequential(HookName::RequestPre, json!({"host": "x"})).await;
        assert_eq!(outcome.hooks_executed, 2);
        assert!(!outcome.stopped());
    }

    #[tokio::test]
    async fn parallel_does_not_short_circuit() {
        let registry = HookRegistry::new();
        registry.register("a", HookName::MetricsRecord, 1, Arc::new(Blocker { host_needle: "x" }));
        registry.register("b", HookName::MetricsRecord, 2, Arc::new(Blocker { host_needle: "x" }));
        let executor = HookExecutor::new(registry);
        let results = executor.execute_parallel(HookName::MetricsRecord, json!({"host": "x"})).await;
        assert_eq!(results.len(), 2);
    }
}
