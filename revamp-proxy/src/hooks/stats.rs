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

use std::time::Duration;

use parking_lot::Mutex;

use crate::hooks::types::HookName;

/// Per-plugin statistics: totals, a running-average execution time,
/// last-execution timestamp, and a per-hook-name breakdown. Guarded by a
/// `Mutex` rather than bare atomics because the running average requires a
/// read-modify-write the caller needs exact, not eventually-consistent.
#[derive(Default)]
pub struct PluginStats {
    inner: Mutex<ahash::HashMap<&'static str, HookStatsEntry>>,
}

#[derive(Debug, Clone, Default)]
pub struct HookStatsEntry {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub average_execution_time: Duration,
    pub last_execution_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
}

impl PluginStats {
    pub fn new() -> Self {
        PluginStats::default()
    }

    pub fn record(&self, hook_name: HookName, outcome: Outcome, elapsed: Duration, now_ms: u64) {
        let mut guard = self.inner.lock();
        let entry = guard.entry(hook_name.as_str()).or_default();
        let previous_total_nanos = entry.average_execution_time.as_nanos() as u64 * entry.executions;
        entry.executions += 1;
        match outcome {
            Outcome::Success => entry.successes += 1,
            Outcome::Failure => entry.failures += 1,
            Outcome::Timeout => {
                entry.failures += 1;
                entry.timeouts += 1;
            }
        }
        let new_total_nanos = previous_total_nanos + elapsed.as_nanos() as u64;
        entry.average_execution_time = Duration::from_nanos(new_total_nanos / entry.executions);
        entry.last_execution_ms = Some(now_ms);
    }

    pub fn snapshot(&self) -> Vec<(&'static str, HookStatsEntry)> {
        self.inner.lock().iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    pub fn totals(&self) -> HookStatsEntry {
        let guard = self.inner.lock();
        let mut total = HookStatsEntry::default();
        let mut weighted_nanos: u128 = 0;
        for entry in guard.values() {
            total.executions += entry.executions;
            total.successes += entry.successes;
            total.failures += entry.failures;
            total.timeouts += entry.timeouts;
            weighted_nanos += entry.average_execution_time.as_nanos() * entry.executions as u128;
            total.last_execution_ms = total.last_execution_ms.max(entry.last_execution_ms);
        }
        if total.executions > 0 {
            total.average_execution_time =
            Duration::from_nanos((weighted_nanos / total.executions as u128) as u64);
        }
        total
    }

    pub fn reset(&self) {
        self.inner.lock().clear();
    }
}

/// Process-wide statistics keyed by plugin id.
#[derive(Default)]
pub struct StatsRegistry {
    per_plugin: parking_lot::RwLock<ahash::HashMap<String, std::sync::Arc<PluginStats>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        StatsRegistry::default()
    }

    pub fn stats_for(&self, plugin_id: &str) -> std::sync::Arc<PluginStats> {
        if let Some(existing) = self.per_plugin.read().get(plugin_id) {
            return existing.clone();
        }
        let mut write = self.per_plugin.write();
        write.entry(plugin_id.to_string()).or_insert_with(|| std::sync::Arc::new(PluginStats::new())).clone()
    }

    pub fn get(&self, plugin_id: &str) -> Option<std::sync::Arc<PluginStats>> {
        self.per_plugin.read().get(plugin_id).cloned()
    }

    pub fn get_all(&self) -> Vec<(String, std::sync::Arc<PluginStats>)> {
        self.per_plugin.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// `resetStats(pluginId?)`: clears one plugin's stats, or every plugin's
    /// when `plugin_id` is `None`.
    pub fn reset(&self, plugin_id: Option<&str>) {
        match plugin_id {
            Some(id) => {
                if let Some(stats) = self.per_plugin.read().get(id) {
                    stats.reset();
                }
            }
            None => {
                for stats in self.per_plugin.read().values() {
                    stats.reset();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_equal_success_plus_failure_and_timeouts_bounded() {
        let stats = PluginStats::new();
        stats.record(HookName::RequestPre, Outcome::Success, Duration::from_millis(5), 1);
        stats.record(HookName::RequestPre, Outcome::Failure, Duration::from_millis(5), 2);
        stats.record(HookName::RequestPre, Outcome::Timeout, Duration::from_millis(5), 3);
        let totals = stats.totals();
        assert_eq!(totals.executions, totals.successes + totals.failures);
        assert!(totals.timeouts <= totals.failures);
    }

    #[test]
    fn reset_clears_all_hook_breakdowns() {
        let stats = PluginStats::new();
        stats.record(HookName::RequestPre, Outcome::Success, Duration::from_millis(1), 1);
        stats.reset();
        assert_eq!(stats.totals().executions, 0);
    }

    #[test]
    fn registry_reset_one_plugin_leaves_others() {
        let registry = StatsRegistry::new();
        registry.stats_for("a").record(HookName::RequestPre, Outcome::Success, Duration::from_millis(1), 1);
        registry.stats_for("b").record(HookName::RequestPre, Outcome::Success, Duration::from_millis(1), 1);
        registry.reset(Some("a"));
        assert_eq!(registry.get("a").unwrap().totals().executions, 0);
        assert_eq!(registry.get("b").unwrap().totals().executions, 1);
    }
}
