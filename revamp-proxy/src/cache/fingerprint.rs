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

use sha2::{Digest, Sha256};

/// SHA-256 over `(clientAddress?, configHash[0..8], url, contentType)`.
/// The pieces are joined with a separator byte that cannot appear in any of
/// them verbatim, so two distinct tuples never collide by concatenation.
pub fn fingerprint(
    client_address: Option<&str>,
    config_hash_prefix: &str,
    url: &str,
    content_type: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_address.unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(config_hash_prefix.as_bytes());
    hasher.update([0u8]);
    hasher.update(url.as_bytes());
    hasher.update([0u8]);
    hasher.update(content_type.as_bytes());
    hex::encode(hasher.finalize())
}

/// The two-character shard prefix used for the on-disk directory layout.
pub fn shard_prefix(fingerprint: &str) -> &str {
    &fingerprint[..2.min(fingerprint.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_sensitive_to_every_component() {
        let a = fingerprint(Some("1.2.3.4"), "abcd1234", "http://x/y", "text/html");
        let b = fingerprint(Some("1.2.3.4"), "abcd1234", "http://x/y", "text/html");
        assert_eq!(a, b);

        let different_client = fingerprint(Some("5.6.7.8"), "abcd1234", "http://x/y", "text/html");
        assert_ne!(a, different_client);

        let different_type = fingerprint(Some("1.2.3.4"), "abcd1234", "http://x/y", "text/css");
        assert_ne!(a, different_type);
    }

    #[test]
    fn shard_prefix_is_first_two_hex_chars() {
        let fp = fingerprint(None, "00000000", "http://a", "text/plain");
        assert_eq!(shard_prefix(&fp), &fp[..2]);
    }
}
