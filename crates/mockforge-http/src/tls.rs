//! TLS/HTTPS support: certificate loading (or self-signed generation) and
//! optional mutual-TLS client certificate verification.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use mockforge_core::{ClientAuthMode, Error, Result, TlsConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tracing::info;

/// The peer identity extracted from a verified client certificate, attached
/// to the request's extensions by the TLS-terminating listener.
#[derive(Debug, Clone)]
pub struct MtlsIdentity {
    /// Certificate subject common name, if present
    pub common_name: Option<String>,
    /// Certificate subject organizational unit, if present
    pub organizational_unit: Option<String>,
}

fn load_cert_chain(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::generic(format!("failed to open certificate file {path}: {e}")))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::generic(format!("failed to parse certificate file {path}: {e}")))?;
    if certs.is_empty() {
        return Err(Error::generic(format!("no certificates found in {path}")));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::generic(format!("failed to open private key file {path}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::pkcs8_private_keys(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::generic(format!("failed to parse private key file {path}: {e}")))?
        .into_iter()
        .next()
        .map(PrivateKeyDer::Pkcs8)
        .ok_or_else(|| Error::generic(format!("no private keys found in {path}")))
}

fn self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| Error::generic(format!("failed to generate self-signed certificate: {e}")))?;
    let cert_der = cert.cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(cert.signing_key.serialize_der().into());
    Ok((vec![cert_der], key_der))
}

/// Build a [`rustls::ServerConfig`] from `config`: either a freshly
/// generated self-signed certificate, or certificate/key files loaded from
/// disk, with optional mutual-TLS client verification per
/// [`ClientAuthMode`].
pub fn build_server_config(config: &TlsConfig) -> Result<Arc<ServerConfig>> {
    let (certs, key) = if config.auto_generate {
        info!("generating self-signed TLS certificate");
        self_signed()?
    } else {
        let cert_path = config
            .cert_path
            .as_deref()
            .ok_or_else(|| Error::generic("tls.cert_path is required when auto_generate is false"))?;
        let key_path = config
            .key_path
            .as_deref()
            .ok_or_else(|| Error::generic("tls.key_path is required when auto_generate is false"))?;
        (load_cert_chain(cert_path)?, load_private_key(key_path)?)
    };

    let builder = ServerConfig::builder();
    let server_config = match config.client_auth {
        ClientAuthMode::None => builder.with_no_client_auth().with_single_cert(certs, key),
        ClientAuthMode::Optional
        | ClientAuthMode::Required
        | ClientAuthMode::RequiredAndVerifyCn
        | ClientAuthMode::RequiredAndVerifyOu => {
            // mTLS modes all verify against the same cert chain as the
            // server's own trust root in absence of a dedicated CA input;
            // CN/OU allowlisting is enforced post-handshake by the caller
            // using the identity extracted from the verified client cert.
            let mut roots = RootCertStore::empty();
            for c in &certs {
                roots.add(c.clone()).map_err(|e| Error::generic(format!("invalid trust root: {e}")))?;
            }
            let verifier = if config.client_auth == ClientAuthMode::Optional {
                WebPkiClientVerifier::builder(Arc::new(roots)).allow_unauthenticated().build()
            } else {
                WebPkiClientVerifier::builder(Arc::new(roots)).build()
            }
            .map_err(|e| Error::generic(format!("failed to build client verifier: {e}")))?;
            builder.with_client_cert_verifier(verifier).with_single_cert(certs, key)
        }
    }
    .map_err(|e| Error::generic(format!("invalid TLS certificate/key pair: {e}")))?;

    Ok(Arc::new(server_config))
}

/// Whether a verified client identity satisfies the configured CN/OU
/// allowlists for `mode`. Modes without an allowlist always pass.
pub fn identity_allowed(mode: ClientAuthMode, config: &TlsConfig, identity: &MtlsIdentity) -> bool {
    match mode {
        ClientAuthMode::RequiredAndVerifyCn => identity
            .common_name
            .as_deref()
            .map(|cn| config.allowed_cns.iter().any(|a| a == cn))
            .unwrap_or(false),
        ClientAuthMode::RequiredAndVerifyOu => identity
            .organizational_unit
            .as_deref()
            .map(|ou| config.allowed_ous.iter().any(|a| a == ou))
            .unwrap_or(false),
        _ => true,
    }
}
