use rustls::pki_types::pem::{self, PemObject, SectionKind};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_native_certs::CertificateResult;
use thiserror::Error;
use tracing::debug;

/// Errors from Rustls
#[derive(Debug, Error)]
pub enum Error {
    /// PEM data is invalid
    #[error("PEM data is invalid: {0}")]
    InvalidPem(#[source] pem::Error),

    /// Identity PEM is missing a private key: the key must be PKCS8, RSA/PKCS1 or SEC1
    #[error("identity PEM is missing a private key: the key must be PKCS8, RSA/PKCS1 or SEC1")]
    MissingPrivateKey,

    /// Identity PEM is missing certificate
    #[error("identity PEM is missing certificate")]
    MissingCertificate,

    /// Invalid private key
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[source] rustls::Error),

    /// Failed to add a root certificate
    #[error("failed to add a root certificate: {0}")]
    AddRootCertificate(#[source] rustls::Error),

    /// No valid native root CA certificates found
    #[error("no valid native root CA certificates found")]
    NoValidNativeRootCA,
}

/// Build a root store from PEM encoded CA bundle.
pub fn root_store(data: &[u8]) -> Result<RootCertStore, Error> {
    let mut root_store = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(data) {
        let cert = cert.map_err(Error::InvalidPem)?;
        root_store.add(cert).map_err(Error::AddRootCertificate)?;
    }

    Ok(root_store)
}

/// Build a root store from the platform's certificates.
pub fn native_root_store() -> Result<RootCertStore, Error> {
    let CertificateResult { certs, errors, .. } = rustls_native_certs::load_native_certs();
    for err in errors {
        debug!(message = "load native certificate failed", %err);
    }

    let mut root_store = RootCertStore::empty();
    for cert in certs {
        if let Err(err) = root_store.add(cert) {
            debug!(message = "certificate parse failed", %err);
        }
    }

    if root_store.is_empty() {
        return Err(Error::NoValidNativeRootCA);
    }

    Ok(root_store)
}

/// Split PEM encoded certificate chain and private key, they may come in any
/// order and even in a single buffer.
pub fn client_auth(
    data: &[u8],
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), Error> {
    let mut cert_chain = Vec::new();
    let mut pkcs8_key = None;
    let mut pkcs1_key = None;
    let mut sec1_key = None;

    for section in <(SectionKind, Vec<u8>)>::pem_slice_iter(data) {
        let (kind, der) = section.map_err(Error::InvalidPem)?;
        match kind {
            SectionKind::Certificate => cert_chain.push(der.into()),
            SectionKind::PrivateKey => pkcs8_key = Some(PrivateKeyDer::Pkcs8(der.into())),
            SectionKind::RsaPrivateKey => pkcs1_key = Some(PrivateKeyDer::Pkcs1(der.into())),
            SectionKind::EcPrivateKey => sec1_key = Some(PrivateKeyDer::Sec1(der.into())),
            _ => {}
        }
    }

    let private_key = pkcs8_key
        .or(pkcs1_key)
        .or(sec1_key)
        .ok_or(Error::MissingPrivateKey)?;

    if cert_chain.is_empty() {
        return Err(Error::MissingCertificate);
    }

    Ok((cert_chain, private_key))
}

pub fn client_config(
    root_store: RootCertStore,
    identity: Option<&[u8]>,
) -> Result<ClientConfig, Error> {
    let builder = ClientConfig::builder().with_root_certificates(root_store);

    match identity {
        Some(identity) => {
            let (chain, key) = client_auth(identity)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(Error::InvalidPrivateKey)
        }
        None => Ok(builder.with_no_client_auth()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identity() {
        assert!(matches!(client_auth(b""), Err(Error::MissingPrivateKey)));
    }

    #[test]
    fn garbage_root_store() {
        // no PEM sections at all
        let store = root_store(b"not a certificate").unwrap();
        assert!(store.is_empty());
    }
}
