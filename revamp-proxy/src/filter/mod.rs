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

use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;

use crate::config::model::{DomainProfile, ProxyConfig, RuleAction};

/// Internal path namespace the pipeline handles itself and never forwards
/// upstream or blocks.
pub const RESERVED_PREFIX: &str = "/__revamp__/";

/// Hardcoded default ad/tracking script patterns, combined with profile
/// additions at request time.
fn default_script_patterns() -> &'static [&'static str] {
    &[r"googlesyndication\.com", r"doubleclick\.net", r"google-analytics\.com"]
}

fn default_css_selectors() -> &'static [&'static str] {
    &[".ad-banner", ".sponsored-content", "#ad-container"]
}

/// Tracks which invalid profile regexes we've already warned about, so a
/// persistently bad pattern only logs once per process instead of once per
/// request.
fn warned_patterns() -> &'static Mutex<std::collections::HashSet<String>> {
    static WARNED: OnceLock<Mutex<std::collections::HashSet<String>>> = OnceLock::new();
    WARNED.get_or_init(|| Mutex::new(std::collections::HashSet::new()))
}

fn compile_pattern(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            let mut warned = warned_patterns().lock();
            if warned.insert(pattern.to_string()) {
                tracing::warn!(pattern, error = %e, "skipping invalid profile regex");
            }
            None
        }
    }
}

/// `should_block_domain`: case-insensitive substring match against
/// the configured ad/tracking domain lists, then profile domain rules in
/// order (first `block` wins, `allow` short-circuits to false).
pub fn should_block_domain(hostname: &str, profile: Option<&DomainProfile>, cfg: &ProxyConfig) -> bool {
    let host = hostname.to_ascii_lowercase();

    if cfg.remove_ads && cfg.ad_domains.iter().any(|d| host.contains(&d.to_ascii_lowercase())) {
        return true;
    }
    if cfg.remove_tracking && cfg.tracking_domains.iter().any(|d| host.contains(&d.to_ascii_lowercase())) {
        return true;
    }

    if let Some(profile) = profile {
        for rule in &profile.domain_rules {
            if !rule.enabled {
                continue;
            }
            if host.contains(&rule.pattern.to_ascii_lowercase()) {
                match rule.action {
                    RuleAction::Block => return true,
                    RuleAction::Allow => return false,
                }
            }
        }
    }

    false
}

/// `should_block_url`: the reserved prefix is never blocked; then
/// substring match against `trackingUrls`, then regex match against
/// profile `url-pattern` rules contributed by the tracking/ad rule sets.
pub fn should_block_url(url: &str, profile: Option<&DomainProfile>, cfg: &ProxyConfig) -> bool {
    if let Some(path) = path_component(url) {
        if path.starts_with(RESERVED_PREFIX) {
            return false;
        }
    }

    if cfg.remove_tracking && cfg.tracking_urls.iter().any(|pattern| url.contains(pattern.as_str())) {
        return true;
    }

    if let Some(profile) = profile {
        for rule in &profile.url_patterns {
            if !rule.enabled {
                continue;
            }
            let Some(re) = compile_pattern(&rule.pattern) else { continue };
            if re.is_match(url) {
                match rule.action {
                    RuleAction::Block => return true,
                    RuleAction::Allow => return false,
                }
            }
        }
    }

    false
}

fn path_component(url: &str) -> Option<String> {
    if let Ok(parsed) = url::Url::parse(url) {
        return Some(parsed.path().to_string());
    }
    // Accept bare paths too (the pipeline may call this with just a path).
    if url.starts_with('/') {
        return Some(url.to_string());
    }
    None
}

/// The per-request pair of (script regex patterns, CSS selectors) combining
/// the hardcoded defaults with the profile's `script-pattern`/`css-selector`
/// rules whose action is `block`.
pub struct AdPatternSet {
    pub script_patterns: Vec<String>,
    pub css_selectors: Vec<String>,
}

pub fn resolve_ad_patterns(profile: Option<&DomainProfile>) -> AdPatternSet {
    let mut script_patterns: Vec<String> = default_script_patterns().iter().map(|s| s.to_string()).collect();
    let mut css_selectors: Vec<String> = default_css_selectors().iter().map(|s| s.to_string()).collect();

    if let Some(profile) = profile {
        for rule in &profile.script_patterns {
            if rule.enabled && rule.action == RuleAction::Block {
                script_patterns.push(rule.pattern.clone());
            }
        }
        for rule in &profile.css_selectors {
            if rule.enabled && rule.action == RuleAction::Block {
                css_selectors.push(rule.pattern.clone());
            }
        }
    }

    AdPatternSet { script_patterns, css_selectors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::ProfileRule;

    fn cfg_with_ads(domains: &[&str]) -> ProxyConfig {
        let mut cfg = ProxyConfig::default();
        cfg.remove_ads = true;
        cfg.ad_domains = domains.iter().map(|s| s.to_string()).collect();
        cfg
    }

    #[test]
    fn blocks_ad_domain_case_insensitively() {
        let cfg = cfg_with_ads(&["ads.example.com"]);
        assert!(should_block_domain("ADS.example.com", None, &cfg));
        assert!(!should_block_domain("api.example.com", None, &cfg));
    }

    #[test]
    fn profile_allow_short_circuits() {
        let cfg = cfg_with_ads(&["ads.example.com"]);
        let profile = DomainProfile {
            domain_rules: vec![ProfileRule {
                    enabled: true,
                    action: RuleAction::Allow,
                    pattern: "ads.example.com".to_string(),
            }],
            ..Default::default()
        };
        // Global ad list still matches first and returns true before the
        // profile is ever consulted: ad list, then profile rules.
        assert!(should_block_domain("ads.example.com", Some(&profile), &cfg));
    }

    #[test]
    fn reserved_prefix_is_never_blocked() {
        let cfg = ProxyConfig::default();
        assert!(!should_block_url("http://x/__revamp__/config", None, &cfg));
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let cfg = ProxyConfig::default();
        let profile = DomainProfile {
            url_patterns: vec![ProfileRule {
                    enabled: true,
                    action: RuleAction::Block,
                    pattern: "(unclosed".to_string(),
            }],
            ..Default::default()
        };
        assert!(!should_block_url("http://x/y", Some(&profile), &cfg));
    }
}
