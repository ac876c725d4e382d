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

use crate::config::model::EffectiveConfig;
use crate::error::{ProxyError, ProxyResult};

/// Classified content family the pipeline derives from the response
/// `content-type` header (first) and the request path extension (fallback).
/// `Other` is never handed to a transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Js,
    Css,
    Html,
    Other,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Js => "js",
            ContentKind::Css => "css",
            ContentKind::Html => "html",
            ContentKind::Other => "other",
        }
    }
}

/// Classifies content type from the response `content-type` header, falling
/// back to the request path's extension: `.js`/`.mjs` →
/// js, `.css` → css, root path / no extension / `.html`/`.htm` → html, else
/// other.
pub fn classify(content_type_header: Option<&str>, path: &str) -> ContentKind {
    if let Some(header) = content_type_header {
        let header = header.to_ascii_lowercase();
        if header.contains("javascript") || header.contains("ecmascript") {
            return ContentKind::Js;
        }
        if header.contains("css") {
            return ContentKind::Css;
        }
        if header.contains("html") {
            return ContentKind::Html;
        }
        if !header.is_empty() && header != "application/octet-stream" {
            return ContentKind::Other;
        }
    }
    classify_by_extension(path)
}

/// Extension-only classification, deliberately ignoring any response header,
/// used exclusively as the cache fingerprint's `contentType` component: a
/// `getCached`/`setCache` pair for the same URL must always hash to the
/// same key regardless of what the upstream happened to answer with.
pub fn classify_by_extension_for_cache(path: &str) -> &'static str {
    classify_by_extension(path).as_str()
}

fn classify_by_extension(path: &str) -> ContentKind {
    let path_only = path.split(['?', '#']).next().unwrap_or(path);
    if path_only.ends_with(".js") || path_only.ends_with(".mjs") {
        return ContentKind::Js;
    }
    if path_only.ends_with(".css") {
        return ContentKind::Css;
    }
    if path_only.is_empty()
    || path_only == "/"
    || path_only.ends_with(".html")
    || path_only.ends_with(".htm")
    || !path_only.rsplit('/').next().unwrap_or("").contains('.')
    {
        return ContentKind::Html;
    }
    ContentKind::Other
}

/// The dispatch contract for content rewriting. Byte-level rewriting is out
/// of scope here; every shipped implementation is an inert pass-through, but
/// the registry and dispatch-by-content-type are load-bearing: the
/// pipeline's cache/transform step depends on them existing and being
/// callable.
pub trait ContentTransformer: Send + Sync {
    fn transform(&self, bytes: &[u8], url: &str, cfg: &EffectiveConfig) -> ProxyResult<Vec<u8>>;
}

struct PassThroughTransformer;

impl ContentTransformer for PassThroughTransformer {
    fn transform(&self, bytes: &[u8], _url: &str, _cfg: &EffectiveConfig) -> ProxyResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Selects a `ContentTransformer` by classified content kind.
/// `Other` is never looked up by the pipeline; asking for it anyway is a
/// caller bug, not a request-level failure.
pub struct TransformerRegistry {
    js: Box<dyn ContentTransformer>,
    css: Box<dyn ContentTransformer>,
    html: Box<dyn ContentTransformer>,
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        TransformerRegistry {
            js: Box::new(PassThroughTransformer),
            css: Box::new(PassThroughTransformer),
            html: Box::new(PassThroughTransformer),
        }
    }
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_kind(&self, kind: ContentKind) -> ProxyResult<&dyn ContentTransformer> {
        match kind {
            ContentKind::Js => Ok(self.js.as_ref()),
            ContentKind::Css => Ok(self.css.as_ref()),
            ContentKind::Html => Ok(self.html.as_ref()),
            ContentKind::Other => Err(ProxyError::TransformFailed("no transformer registered for 'other'".into())),
        }
    }

    /// Runs the registered transformer for `kind`. The caller (the
    /// pipeline) decides what to do with a `TransformFailed` error, such as
    /// serving the untransformed upstream bytes — this just surfaces it.
    pub fn transform(
        &self,
        kind: ContentKind,
        bytes: &[u8],
        url: &str,
        cfg: &EffectiveConfig,
    ) -> ProxyResult<Vec<u8>> {
        self.for_kind(kind)?.transform(bytes, url, cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_content_type_header_first() {
        assert_eq!(classify(Some("text/html; charset=utf-8"), "/app.js"), ContentKind::Html);
        assert_eq!(classify(Some("application/javascript"), "/x"), ContentKind::Js);
        assert_eq!(classify(Some("text/css"), "/x"), ContentKind::Css);
    }

    #[test]
    fn falls_back_to_extension_when_header_absent() {
        assert_eq!(classify(None, "/app.js"), ContentKind::Js);
        assert_eq!(classify(None, "/app.mjs"), ContentKind::Js);
        assert_eq!(classify(None, "/style.css"), ContentKind::Css);
        assert_eq!(classify(None, "/"), ContentKind::Html);
        assert_eq!(classify(None, "/no-extension-path"), ContentKind::Html);
        assert_eq!(classify(None, "/image.png"), ContentKind::Other);
    }

    #[test]
    fn pass_through_transformer_preserves_rsc_marker_bytes() {
        let registry = TransformerRegistry::new();
        let cfg = EffectiveConfig::resolve(&crate::config::model::ProxyConfig::default(), None);
        let body = br#"self.__next_f.push([1,"1a:[\"$\",\"html\",null]"])"#;
        let out = registry.transform(ContentKind::Js, body, "https://x/y.js", &cfg).unwrap();
        assert_eq!(out, body);
    }
}
