//! TLS configuration and certificate loading.
//!
//! A TLS listener needs a certificate/key pair on disk. When neither file
//! exists a self-signed pair valid for ten years is generated for the listen
//! host and written out before first use.

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use tokio_rustls::TlsAcceptor;

const CERTIFICATE_VALIDITY_DAYS: i64 = 3650;
const CERTIFICATE_ORGANIZATION: &str = "forward-proxy";

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("TLS IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
    #[error("Exactly one of {cert:?} and {key:?} exists; provide both or neither")]
    PartialMaterial { cert: String, key: String },
}

/// Make sure a certificate/key pair exists at the given paths.
///
/// Returns `true` when a new pair was generated.
pub fn ensure_certificate(cert_path: &Path, key_path: &Path, host: &str) -> Result<bool, TlsError> {
    match (cert_path.exists(), key_path.exists()) {
        (true, true) => Ok(false),
        (false, false) => {
            let (cert_pem, key_pem) = generate_self_signed(host)?;
            write_pem(key_path, &key_pem)?;
            write_pem(cert_path, &cert_pem)?;
            tracing::info!(
                cert_path = %cert_path.display(),
                key_path = %key_path.display(),
                host = %host,
                "Generated self-signed certificate"
            );
            Ok(true)
        }
        _ => Err(TlsError::PartialMaterial {
            cert: cert_path.display().to_string(),
            key: key_path.display().to_string(),
        }),
    }
}

/// Generate a self-signed certificate for `host`, returning `(cert_pem, key_pem)`.
///
/// Wildcard binds are issued for `localhost`, which also covers loopback IPs.
pub fn generate_self_signed(host: &str) -> Result<(String, String), TlsError> {
    let host = match host {
        "" | "0.0.0.0" | "::" | "[::]" => "localhost",
        other => other.trim_start_matches('[').trim_end_matches(']'),
    };

    let mut params = CertificateParams::new(Vec::<String>::new())?;
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, host.to_string());
    distinguished_name.push(DnType::OrganizationName, CERTIFICATE_ORGANIZATION);
    params.distinguished_name = distinguished_name;

    if let Ok(ip) = host.parse::<IpAddr>() {
        params.subject_alt_names.push(SanType::IpAddress(ip));
    } else {
        params
            .subject_alt_names
            .push(SanType::DnsName(host.to_string().try_into()?));
    }
    if host == "localhost" {
        params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::from([127, 0, 0, 1])));
    }

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(1);
    params.not_after = now + time::Duration::days(CERTIFICATE_VALIDITY_DAYS);

    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    Ok((cert.pem(), key.serialize_pem()))
}

fn write_pem(path: &Path, pem: &str) -> Result<(), TlsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, pem)?;
    Ok(())
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, TlsError> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        )
        .into());
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        )
        .into());
    }

    Ok(RustlsConfig::from_pem_file(cert_path, key_path).await?)
}

/// Build the acceptor a TLS listener hands each connection to.
///
/// The proxy only speaks HTTP/1.1, so ALPN is narrowed accordingly.
pub async fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let rustls_config = load_tls_config(cert_path, key_path).await?;

    let mut server_config = (*rustls_config.get_inner()).clone();
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    tracing::debug!(cert_path = %cert_path.display(), "TLS acceptor ready");
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
