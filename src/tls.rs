// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! HTTPS listener configuration from a PEM certificate chain and private key.

use crate::config::TlsConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

/// Minimum time between modification checks of the certificate files.
const RECHECK_INTERVAL: Duration = Duration::from_secs(5);

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.into())
}

/// Resolve `path` against `base` unless it is already absolute.
fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Build the rustls server config for `tls`. Relative paths are resolved against `base`.
/// Replacing the files on disk takes effect without a restart.
pub fn load_rustls_config(tls: &TlsConfig, base: &Path) -> io::Result<rustls::ServerConfig> {
    if tls.cert.trim().is_empty() || tls.key.trim().is_empty() {
        return Err(invalid("tls.cert and tls.key are both required"));
    }
    let resolver = ReloadingResolver::new(resolve(base, &tls.cert), resolve(base, &tls.key))?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| invalid(err.to_string()))?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    Ok(config)
}

fn read_cert_chain(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let pem = fs::read(path)
        .map_err(|err| io::Error::new(err.kind(), format!("{}: {}", path.display(), err)))?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| invalid(format!("{}: {}", path.display(), err)))?;
    if certs.is_empty() {
        return Err(invalid(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    let pem = fs::read(path)
        .map_err(|err| io::Error::new(err.kind(), format!("{}: {}", path.display(), err)))?;
    PrivateKeyDer::from_pem_slice(&pem).map_err(|err| invalid(format!("{}: {}", path.display(), err)))
}

fn load_certified_key(cert: &Path, key: &Path) -> io::Result<Arc<CertifiedKey>> {
    let chain = read_cert_chain(cert)?;
    let private_key = read_private_key(key)?;
    let provider = rustls::crypto::ring::default_provider();
    CertifiedKey::from_der(chain, private_key, &provider)
        .map(Arc::new)
        .map_err(|err| invalid(err.to_string()))
}

fn modified_at(cert: &Path, key: &Path) -> io::Result<SystemTime> {
    Ok(fs::metadata(cert)?.modified()?.max(fs::metadata(key)?.modified()?))
}

#[derive(Debug)]
struct Loaded {
    key: Arc<CertifiedKey>,
    modified: SystemTime,
    checked: SystemTime,
}

#[derive(Debug)]
struct ReloadingResolver {
    cert: PathBuf,
    key: PathBuf,
    loaded: RwLock<Loaded>,
}

impl ReloadingResolver {
    fn new(cert: PathBuf, key: PathBuf) -> io::Result<Self> {
        let loaded = Loaded {
            key: load_certified_key(&cert, &key)?,
            modified: modified_at(&cert, &key)?,
            checked: SystemTime::now(),
        };
        Ok(Self {
            cert,
            key,
            loaded: RwLock::new(loaded),
        })
    }

    fn refresh(&self) -> io::Result<()> {
        let mut loaded = self.loaded.write().unwrap_or_else(|e| e.into_inner());
        let now = SystemTime::now();
        if now
            .duration_since(loaded.checked)
            .is_ok_and(|elapsed| elapsed < RECHECK_INTERVAL)
        {
            return Ok(());
        }
        loaded.checked = now;

        let modified = modified_at(&self.cert, &self.key)?;
        if modified > loaded.modified {
            loaded.key = load_certified_key(&self.cert, &self.key)?;
            loaded.modified = modified;
            log::info!("Reloaded TLS certificate from {}", self.cert.display());
        }
        Ok(())
    }
}

impl ResolvesServerCert for ReloadingResolver {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        if let Err(err) = self.refresh() {
            log::warn!("TLS certificate reload failed: {}", err);
        }
        let loaded = self.loaded.read().unwrap_or_else(|e| e.into_inner());
        Some(loaded.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_fixtures::TestFixtureRoot;

    fn tls(cert: &str, key: &str) -> TlsConfig {
        TlsConfig {
            cert: cert.to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn both_paths_are_required() {
        let err = load_rustls_config(&tls("cert.pem", ""), Path::new(".")).expect_err("missing key");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_files_are_reported_with_their_path() {
        let fixture = TestFixtureRoot::new_unique("tls-missing").expect("fixture");
        let err = load_rustls_config(&tls("cert.pem", "key.pem"), fixture.path()).expect_err("missing");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("cert.pem"));
    }

    #[test]
    fn garbage_pem_is_rejected() {
        let fixture = TestFixtureRoot::new_unique("tls-garbage").expect("fixture");
        let cert = fixture.write("/cert.pem", "not a certificate").expect("cert");
        let key = fixture.write("/key.pem", "not a key").expect("key");
        assert!(read_cert_chain(&cert).is_err());
        assert!(read_private_key(&key).is_err());
    }

    #[test]
    fn relative_paths_resolve_against_the_base() {
        assert_eq!(resolve(Path::new("/srv/site"), "tls/cert.pem"), PathBuf::from("/srv/site/tls/cert.pem"));
        assert_eq!(resolve(Path::new("/srv/site"), "/etc/cert.pem"), PathBuf::from("/etc/cert.pem"));
    }
}
