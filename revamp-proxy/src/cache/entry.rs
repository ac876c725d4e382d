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

use std::time::{SystemTime, UNIX_EPOCH};

/// One cache entry: the raw body plus the fields needed to decide
/// freshness and to reconstruct the entry from the file tier.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Vec<u8>,
    pub content_type: String,
    pub timestamp_ms: u64,
    pub url: String,
}

impl CacheEntry {
    pub fn new(data: Vec<u8>, content_type: String, url: String) -> Self {
        CacheEntry { data, content_type, timestamp_ms: now_ms(), url }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_fresh(&self, ttl_seconds: u64) -> bool {
        now_ms().saturating_sub(self.timestamp_ms) < ttl_seconds.saturating_mul(1000)
    }

    /// Renders the `.meta` sibling as a line-oriented `key: value` record.
    pub fn render_meta(&self) -> String {
        format!(
            "content_type: {}\ntimestamp_ms: {}\nurl: {}\n",
            self.content_type, self.timestamp_ms, self.url
        )
    }

    pub fn parse_meta(data: Vec<u8>, meta: &str) -> Option<CacheEntry> {
        let mut content_type = None;
        let mut timestamp_ms = None;
        let mut url = None;
        for line in meta.lines() {
            let (key, value) = line.split_once(": ")?;
            match key {
                "content_type" => content_type = Some(value.to_string()),
                "timestamp_ms" => timestamp_ms = value.parse::<u64>().ok(),
                "url" => url = Some(value.to_string()),
                _ => {}
            }
        }
        Some(CacheEntry { data, content_type: content_type?, timestamp_ms: timestamp_ms?, url: url? })
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_round_trips() {
        let entry = CacheEntry::new(b"hello".to_vec(), "text/html".to_string(), "http://x/y".to_string());
        let rendered = entry.render_meta();
        let parsed = CacheEntry::parse_meta(entry.data.clone(), &rendered).unwrap();
        assert_eq!(parsed.content_type, entry.content_type);
        assert_eq!(parsed.timestamp_ms, entry.timestamp_ms);
        assert_eq!(parsed.url, entry.url);
    }

    #[test]
    fn freshness_respects_ttl() {
        let mut entry = CacheEntry::new(b"x".to_vec(), "text/plain".to_string(), "http://x".to_string());
        assert!(entry.is_fresh(60));
        entry.timestamp_ms = 0;
        assert!(!entry.is_fresh(60));
    }
}
