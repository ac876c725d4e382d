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

pub mod entry;
pub mod fingerprint;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use revamp_core::{BoundedLruSet, SizedLru};

use crate::cache::entry::CacheEntry;

/// Upper bound on the memory tier: 100 MiB.
pub const MAX_MEMORY_CACHE_SIZE: usize = 100 * 1024 * 1024;

/// Cap on the redirect-URL tracker.
const MAX_REDIRECT_ENTRIES: usize = 10_000;

/// Hosts that are never cached regardless of TTL — iCloud/Apple endpoints
/// are known to misbehave when served stale or transformed bodies.
const NEVER_CACHE_HOST_SUFFIXES: &[&str] =
    &["icloud.com", "apple.com", "icloud-content.com", "me.com"];

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_size: usize,
}

/// The two-tier content cache described in: an in-memory LRU tier
/// backed by a sharded file tier. Memory is authoritative for reads; file
/// writes are fire-and-forget background tasks.
pub struct ContentCache {
    memory: SizedLru<String, Arc<CacheEntry>>,
    redirects: BoundedLruSet<String>,
    cache_dir: PathBuf,
}

impl ContentCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        ContentCache {
            memory: SizedLru::new(MAX_MEMORY_CACHE_SIZE),
            redirects: BoundedLruSet::new(MAX_REDIRECT_ENTRIES),
            cache_dir: cache_dir.into(),
        }
    }

    fn is_never_cache_host(url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else { return false };
        let Some(host) = parsed.host_str() else { return false };
        let host = host.to_ascii_lowercase();
        NEVER_CACHE_HOST_SUFFIXES
            .iter()
            .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")))
    }

    /// Strips the fragment so URLs differing only by `#...` are treated as
    /// the same redirect target.
    fn normalize_for_redirect(url: &str) -> String {
        match url::Url::parse(url) {
            Ok(mut parsed) => {
                parsed.set_fragment(None);
                parsed.to_string()
            }
            Err(_) => url.split('#').next().unwrap_or(url).to_string(),
        }
    }

    pub fn is_redirect_status(status: u16) -> bool {
        matches!(status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn mark_as_redirect(&self, url: &str) {
        self.redirects.insert(Self::normalize_for_redirect(url));
    }

    fn is_marked_redirect(&self, url: &str) -> bool {
        self.redirects.contains(&Self::normalize_for_redirect(url))
    }

    /// `getCached`.
    pub async fn get_cached(
        &self,
        url: &str,
        content_type: &str,
        client: Option<&str>,
        config_hash_prefix: &str,
        cache_enabled: bool,
        ttl_seconds: u64,
    ) -> Option<Vec<u8>> {
        if !cache_enabled {
            return None;
        }
        if Self::is_never_cache_host(url) || self.is_marked_redirect(url) {
            return None;
        }

        let key = fingerprint::fingerprint(client, config_hash_prefix, url, content_type);

        if let Some(entry) = self.memory.get(&key) {
            if entry.is_fresh(ttl_seconds) {
                // `get` already refreshed LRU order as a side effect of the
                // lookup on the underlying `LruCache`.
                return Some(entry.data.clone());
            }
            self.memory.remove(&key);
        }

        match self.read_file_tier(&key).await {
            Some(entry) if entry.is_fresh(ttl_seconds) => {
                let size = entry.size();
                let entry = Arc::new(entry);
                self.memory.insert(key, entry.clone(), size);
                Some(entry.data.clone())
            }
            Some(_) => {
                self.schedule_file_delete(&key);
                None
            }
            None => None,
        }
    }

    /// `setCache`.
    pub fn set_cache(
        &self,
        url: &str,
        content_type: &str,
        bytes: Vec<u8>,
        client: Option<&str>,
        config_hash_prefix: &str,
        cache_enabled: bool,
    ) {
        if !cache_enabled {
            return;
        }
        if Self::is_never_cache_host(url) || self.is_marked_redirect(url) {
            return;
        }

        let key = fingerprint::fingerprint(client, config_hash_prefix, url, content_type);
        let entry = CacheEntry::new(bytes, content_type.to_string(), url.to_string());
        let size = entry.size();
        let entry = Arc::new(entry);
        self.memory.insert(key.clone(), entry.clone(), size);
        self.schedule_file_write(key, entry);
    }

    pub fn clear_cache(&self) {
        self.memory.clear();
        let dir = self.cache_dir.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %e, path = %dir.display(), "failed to clear file-tier cache");
                }
            }
        });
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats { memory_entries: self.memory.len(), memory_size: self.memory.current_size() }
    }

    fn shard_path(&self, key: &str) -> (PathBuf, PathBuf, PathBuf) {
        let shard_dir = self.cache_dir.join(fingerprint::shard_prefix(key));
        let data_path = shard_dir.join(key);
        let meta_path = shard_dir.join(format!("{key}.meta"));
        (shard_dir, data_path, meta_path)
    }

    async fn read_file_tier(&self, key: &str) -> Option<CacheEntry> {
        let (_, data_path, meta_path) = self.shard_path(key);
        let data = tokio::fs::read(&data_path).await.ok()?;
        let meta = tokio::fs::read_to_string(&meta_path).await.ok()?;
        CacheEntry::parse_meta(data, &meta)
    }

    fn schedule_file_write(&self, key: String, entry: Arc<CacheEntry>) {
        let (shard_dir, data_path, meta_path) = self.shard_path(&key);
        tokio::spawn(async move {
            if let Err(e) = write_file_tier(&shard_dir, &data_path, &meta_path, &entry).await {
                tracing::warn!(error = %e, key, "background cache file write failed (memory tier remains authoritative)");
            }
        });
    }

    fn schedule_file_delete(&self, key: &str) {
        let (_, data_path, meta_path) = self.shard_path(key);
        tokio::spawn(async move {
            let _ = tokio::fs::remove_file(&data_path).await;
            let _ = tokio::fs::remove_file(&meta_path).await;
        });
    }
}

async fn write_file_tier(
    shard_dir: &Path,
    data_path: &Path,
    meta_path: &Path,
    entry: &CacheEntry,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(shard_dir).await?;
    tokio::fs::write(data_path, &entry.data).await?;
    tokio::fs::write(meta_path, entry.render_meta()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_then_get_round_trips_through_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        cache.set_cache("https://x/y", "text/html", b"<html>X</html>".to_vec(), None, "00000000", true);
        let got = cache.get_cached("https://x/y", "text/html", None, "00000000", true, 3600).await;
        assert_eq!(got, Some(b"<html>X</html>".to_vec()));
    }

    #[tokio::test]
    async fn disabled_cache_never_stores_or_serves() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        cache.set_cache("https://x/y", "text/html", b"data".to_vec(), None, "00000000", false);
        let got = cache.get_cached("https://x/y", "text/html", None, "00000000", false, 3600).await;
        assert_eq!(got, None);
        assert_eq!(cache.cache_stats().memory_entries, 0);
    }

    #[tokio::test]
    async fn never_cache_hosts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        cache.set_cache("https://www.icloud.com/x", "text/html", b"data".to_vec(), None, "00000000", true);
        let got = cache.get_cached("https://www.icloud.com/x", "text/html", None, "00000000", true, 3600).await;
        assert_eq!(got, None);
        assert_eq!(cache.cache_stats().memory_entries, 0);
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        cache.set_cache("https://x/y", "text/html", b"data".to_vec(), None, "00000000", true);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let got = cache.get_cached("https://x/y", "text/html", None, "00000000", true, 0).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn redirect_marking_blocks_cache_by_fragment_insensitive_url() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        cache.mark_as_redirect("https://x/y#section1");
        cache.set_cache("https://x/y", "text/html", b"data".to_vec(), None, "00000000", true);
        let got = cache.get_cached("https://x/y", "text/html", None, "00000000", true, 3600).await;
        assert_eq!(got, None);
    }

    #[test]
    fn is_redirect_status_matches_exact_set() {
        for code in [301, 302, 303, 307, 308] {
            assert!(ContentCache::is_redirect_status(code));
        }
        for code in [200, 204, 404, 500] {
            assert!(!ContentCache::is_redirect_status(code));
        }
    }

    #[tokio::test]
    async fn clear_cache_empties_memory_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path());
        cache.set_cache("https://x/y", "text/html", b"data".to_vec(), None, "00000000", true);
        cache.clear_cache();
        assert_eq!(cache.cache_stats().memory_entries, 0);
    }
}
