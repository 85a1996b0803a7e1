//! TLS material loading and self-signed bootstrap.
//!
//! When the configured certificate or key is missing and `auto_generate`
//! is on, a self-signed certificate (CN `transcription-server`, ~10-year
//! validity, localhost/loopback SANs) is generated in-process and persisted
//! under the data dir so later starts reuse it. Missing material with
//! auto-generation off is a startup failure.

use crate::config::TlsConfig;
use axum_server::tls_rustls::RustlsConfig;
use rcgen::{CertificateParams, DnType, KeyPair, SanType};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";
const VALIDITY_YEARS: i32 = 10;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS material missing and auto_generate is disabled")]
    MaterialMissing,
    #[error("certificate generation failed: {0}")]
    Generate(String),
    #[error("TLS I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolved on-disk certificate and key.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsMaterial {
    pub async fn into_rustls_config(self) -> Result<RustlsConfig, TlsError> {
        // rustls 0.23+ wants an explicit process-wide crypto provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
        RustlsConfig::from_pem_file(&self.cert_path, &self.key_path)
            .await
            .map_err(TlsError::Io)
    }
}

/// Resolve TLS material per config, generating it when allowed.
/// Returns `None` when TLS is disabled.
pub fn resolve_material(config: &TlsConfig, data_dir: &Path) -> Result<Option<TlsMaterial>, TlsError> {
    if !config.enabled {
        return Ok(None);
    }

    if let (Some(cert), Some(key)) = (&config.cert_file, &config.key_file) {
        if cert.exists() && key.exists() {
            info!(cert = %cert.display(), "using configured TLS certificate");
            return Ok(Some(TlsMaterial {
                cert_path: cert.clone(),
                key_path: key.clone(),
            }));
        }
    }

    if !config.auto_generate {
        return Err(TlsError::MaterialMissing);
    }

    let cert_path = data_dir.join(CERT_FILE);
    let key_path = data_dir.join(KEY_FILE);
    if cert_path.exists() && key_path.exists() {
        info!("using existing self-signed certificate");
        return Ok(Some(TlsMaterial { cert_path, key_path }));
    }

    info!("generating self-signed certificate");
    std::fs::create_dir_all(data_dir)?;
    let (cert_pem, key_pem) = generate_self_signed()?;
    std::fs::write(&cert_path, cert_pem)?;
    std::fs::write(&key_path, key_pem)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }
    info!(cert = %cert_path.display(), "self-signed certificate generated");
    Ok(Some(TlsMaterial { cert_path, key_path }))
}

fn generate_self_signed() -> Result<(String, String), TlsError> {
    use chrono::Datelike;

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, "transcription-server");
    params.subject_alt_names = vec![
        SanType::DnsName(
            "localhost"
                .try_into()
                .map_err(|e| TlsError::Generate(format!("{e}")))?,
        ),
        SanType::IpAddress(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)),
    ];
    // Valid from the start of this year for ~10 years.
    let year = chrono::Utc::now().date_naive().year();
    params.not_before = rcgen::date_time_ymd(year, 1, 1);
    params.not_after = rcgen::date_time_ymd(year + VALIDITY_YEARS, 1, 1);

    let key_pair = KeyPair::generate().map_err(|e| TlsError::Generate(e.to_string()))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| TlsError::Generate(e.to_string()))?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}
