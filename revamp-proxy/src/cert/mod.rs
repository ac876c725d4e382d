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

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;

use crate::error::{ProxyError, ProxyResult};

const ROOT_CN: &str = "Revamp Proxy CA";
const LEAF_VALIDITY_DAYS: i64 = 825;

/// A minted leaf: the TLS server config a SOCKS5/HTTP-proxy connection
/// hands to `tokio_rustls::TlsAcceptor` once it decides to terminate TLS
/// for this hostname, plus the raw PEM kept for diagnostics.
pub struct LeafCertificate {
    pub server_config: Arc<ServerConfig>,
}

/// Owns the one long-lived root key/cert pair and mints per-hostname
/// leaves signed by it, caching them for the process lifetime.
pub struct CertificateAuthority {
    root_cert_der: CertificateDer<'static>,
    root_key: KeyPair,
    root_params: CertificateParams,
    leaves: Mutex<ahash::HashMap<String, Arc<LeafCertificate>>>,
}

impl CertificateAuthority {
    /// Loads the root from `cert_dir/ca.{key,crt}`, generating and
    /// persisting a fresh one if absent. A write failure on first
    /// generation is fatal per (`PortalCertWriteFailed`); a read
    /// failure on an existing root aborts startup the same way.
    pub fn ensure_root(cert_dir: &Path) -> ProxyResult<Self> {
        fs::create_dir_all(cert_dir).map_err(|e| {
            ProxyError::PortalCertWriteFailed(format!("cannot create {}: {e}", cert_dir.display()))
        })?;

        let key_path = cert_dir.join("ca.key");
        let cert_path = cert_dir.join("ca.crt");

        if key_path.exists() && cert_path.exists() {
            Self::load_root(&key_path, &cert_path)
        } else {
            Self::generate_root(&key_path, &cert_path)
        }
    }

    fn root_params() -> ProxyResult<CertificateParams> {
        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| ProxyError::ConfigInvalid(format!("invalid CA params: {e}")))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, ROOT_CN);
        dn.push(DnType::OrganizationName, "Revamp Proxy");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        Ok(params)
    }

    fn generate_root(key_path: &Path, cert_path: &Path) -> ProxyResult<Self> {
        let key = KeyPair::generate()
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("key generation failed: {e}")))?;
        let params = Self::root_params()?;
        let cert = params
            .clone()
            .self_signed(&key)
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("root signing failed: {e}")))?;

        fs::write(key_path, key.serialize_pem())
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("writing {}: {e}", key_path.display())))?;
        fs::write(cert_path, cert.pem())
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("writing {}: {e}", cert_path.display())))?;

        tracing::info!(path = %cert_path.display(), "generated new root CA");

        Ok(CertificateAuthority {
            root_cert_der: cert.der().clone(),
            root_key: key,
            root_params: params,
            leaves: Mutex::new(ahash::HashMap::default()),
        })
    }

    fn load_root(key_path: &Path, cert_path: &Path) -> ProxyResult<Self> {
        let key_pem = fs::read_to_string(key_path)
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("reading {}: {e}", key_path.display())))?;
        let cert_pem = fs::read_to_string(cert_path)
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("reading {}: {e}", cert_path.display())))?;

        let key = KeyPair::from_pem(&key_pem)
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("invalid root key: {e}")))?;

        let mut reader = std::io::Cursor::new(cert_pem.as_bytes());
        let der = rustls_pemfile::certs(&mut reader)
            .next()
            .ok_or_else(|| ProxyError::PortalCertWriteFailed("root cert PEM has no certificate".into()))?
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("invalid root cert: {e}")))?;

        let params = Self::root_params()?;

        Ok(CertificateAuthority {
            root_cert_der: der,
            root_key: key,
            root_params: params,
            leaves: Mutex::new(ahash::HashMap::default()),
        })
    }

    pub fn root_cert_der(&self) -> &CertificateDer<'static> {
        &self.root_cert_der
    }

    pub fn root_cert_pem(&self) -> String {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD.encode(&self.root_cert_der);
        let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
        for chunk in b64.as_bytes().chunks(64) {
            pem.push_str(std::str::from_utf8(chunk).unwrap());
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
        pem
    }

    /// Returns the cached leaf for `hostname`, minting and caching a new
    /// one synchronously on first miss. Mint is deterministic for the
    /// process's lifetime: repeat calls for the same host return the same
    /// `Arc`.
    pub fn leaf_for(&self, hostname: &str) -> ProxyResult<Arc<LeafCertificate>> {
        {
            let guard = self.leaves.lock();
            if let Some(existing) = guard.get(hostname) {
                return Ok(existing.clone());
            }
        }

        let leaf = Arc::new(self.mint_leaf(hostname)?);
        let mut guard = self.leaves.lock();
        Ok(guard.entry(hostname.to_string()).or_insert(leaf).clone())
    }

    fn mint_leaf(&self, hostname: &str) -> ProxyResult<LeafCertificate> {
        let leaf_key = KeyPair::generate()
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("leaf key generation failed: {e}")))?;

        let san = if hostname.parse::<std::net::IpAddr>().is_ok() {
            SanType::IpAddress(hostname.parse().unwrap())
        } else {
            SanType::DnsName(
                hostname
                    .try_into()
                    .map_err(|e| ProxyError::ConfigInvalid(format!("invalid hostname '{hostname}': {e:?}")))?,
            )
        };

        let mut params = CertificateParams::new(vec![hostname.to_string()])
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("invalid leaf params: {e}")))?;
        params.subject_alt_names = vec![san];
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, hostname);
        params.distinguished_name = dn;
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
        params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(LEAF_VALIDITY_DAYS);

        let issuer = Issuer::new(self.root_params.clone(), &self.root_key);
        let leaf_cert = params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("leaf signing failed for {hostname}: {e}")))?;

        let chain = vec![leaf_cert.der().clone(), self.root_cert_der.clone()];
        let key_der = PrivatePkcs8KeyDer::from(leaf_key.serialize_der());

        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key_der.into())
            .map_err(|e| ProxyError::PortalCertWriteFailed(format!("building TLS server config for {hostname}: {e}")))?;

        tracing::debug!(hostname, "minted leaf certificate");

        Ok(LeafCertificate { server_config: Arc::new(server_config) })
    }
}

pub fn default_cert_dir() -> PathBuf {
    PathBuf::from("./data/certs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_root_generates_and_persists_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::ensure_root(dir.path()).unwrap();
        assert!(dir.path().join("ca.key").exists());
        assert!(dir.path().join("ca.crt").exists());

        let reloaded = CertificateAuthority::ensure_root(dir.path()).unwrap();
        assert_eq!(ca.root_cert_der().as_ref(), reloaded.root_cert_der().as_ref());
    }

    #[test]
    fn leaf_for_is_cached_per_hostname() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::ensure_root(dir.path()).unwrap();

        let first = ca.leaf_for("example.com").unwrap();
        let second = ca.leaf_for("example.com").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = ca.leaf_for("other.example.com").unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn leaf_for_accepts_ip_address_hostnames() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::ensure_root(dir.path()).unwrap();
        assert!(ca.leaf_for("192.168.1.1").is_ok());
    }

    #[test]
    fn root_cert_pem_is_wrapped_at_64_columns() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::ensure_root(dir.path()).unwrap();
        let pem = ca.root_cert_pem();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        for line in pem.lines() {
            if line.starts_with("-----") {
                continue;
            }
            assert!(line.len() <= 64);
        }
    }
}
