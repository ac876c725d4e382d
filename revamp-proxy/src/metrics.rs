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

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Process-wide counters updated at fixed points in the request pipeline:
/// entry, block decisions, cache hits/misses, successful transforms,
/// response framing (bandwidth), and terminal errors. Plain atomics are
/// enough here — every update is a single increment, never a
/// read-modify-write across fields (unlike the plugin hook stats).
#[derive(Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    blocked_total: AtomicU64,
    cache_hits_total: AtomicU64,
    cache_misses_total: AtomicU64,
    transforms_total: AtomicU64,
    bandwidth_bytes_total: AtomicU64,
    errors_total: AtomicU64,
    transforms_by_type: Mutex<ahash::HashMap<String, u64>>,
    plugin_metrics: Mutex<ahash::HashMap<String, i64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub blocked_total: u64,
    pub cache_hits_total: u64,
    pub cache_misses_total: u64,
    pub transforms_total: u64,
    pub bandwidth_bytes_total: u64,
    pub errors_total: u64,
    pub transforms_by_type: ahash::HashMap<String, u64>,
    pub plugin_metrics: ahash::HashMap<String, i64>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transform(&self, content_type: &str) {
        self.transforms_total.fetch_add(1, Ordering::Relaxed);
        let mut by_type = self.transforms_by_type.lock();
        *by_type.entry(content_type.to_string()).or_insert(0) += 1;
    }

    pub fn record_bandwidth(&self, bytes: usize) {
        self.bandwidth_bytes_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Freeform counter plugins can bump through their metrics permission,
    /// additive, keyed by `"{plugin_id}.{name}"`.
    pub fn record_plugin_metric(&self, plugin_id: &str, name: &str, value: i64) {
        let mut metrics = self.plugin_metrics.lock();
        *metrics.entry(format!("{plugin_id}.{name}")).or_insert(0) += value;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            blocked_total: self.blocked_total.load(Ordering::Relaxed),
            cache_hits_total: self.cache_hits_total.load(Ordering::Relaxed),
            cache_misses_total: self.cache_misses_total.load(Ordering::Relaxed),
            transforms_total: self.transforms_total.load(Ordering::Relaxed),
            bandwidth_bytes_total: self.bandwidth_bytes_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            transforms_by_type: self.transforms_by_type.lock().clone(),
            plugin_metrics: self.plugin_metrics.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let metrics = Metrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_blocked();
        metrics.record_transform("html");
        metrics.record_transform("html");
        metrics.record_transform("js");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.blocked_total, 1);
        assert_eq!(snapshot.transforms_total, 3);
        assert_eq!(snapshot.transforms_by_type.get("html"), Some(&2));
        assert_eq!(snapshot.transforms_by_type.get("js"), Some(&1));
    }

    #[test]
    fn plugin_metrics_are_additive_per_key() {
        let metrics = Metrics::new();
        metrics.record_plugin_metric("rate-limiter", "requests", 1);
        metrics.record_plugin_metric("rate-limiter", "requests", 1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.plugin_metrics.get("rate-limiter.requests"), Some(&2));
    }
}
