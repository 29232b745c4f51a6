//! TLS listener configuration.
//!
//! Two rustls server configurations built from the same credentials: the
//! main listener requires a client certificate chaining to our own CA
//! (verify peer), the control listener authenticates the server only.

use std::sync::Arc;

use rustls::{
    RootCertStore, ServerConfig,
    pki_types::{CertificateDer, PrivatePkcs8KeyDer},
    server::WebPkiClientVerifier,
};
use tokio_rustls::TlsAcceptor;

use crate::{error::ServerError, pki::CertificateAuthority};

/// TLS acceptors for both listeners.
#[derive(Clone)]
pub struct TlsAcceptors {
    /// Main listener: mutual TLS, client cert must chain to our CA.
    pub main: TlsAcceptor,
    /// Control listener: server-authenticated only.
    pub control: TlsAcceptor,
}

/// Build both acceptors from the on-disk PKI.
pub fn build_acceptors(
    pki: &CertificateAuthority,
    key_password: &str,
) -> Result<TlsAcceptors, ServerError> {
    let ca_certs = load_certs(&pki.ca_cert_path())?;
    let server_chain = load_certs(&pki.server_cert_path())?;
    let key = pki.load_server_key(key_password)?;

    let mut roots = RootCertStore::empty();
    for cert in &ca_certs {
        roots
            .add(cert.clone())
            .map_err(|e| ServerError::Config(format!("bad CA certificate: {e}")))?;
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| ServerError::Config(format!("client verifier: {e}")))?;

    let main = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(server_chain.clone(), clone_key(&key).into())
        .map_err(|e| ServerError::Config(format!("main TLS config: {e}")))?;

    let control = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(server_chain, clone_key(&key).into())
        .map_err(|e| ServerError::Config(format!("control TLS config: {e}")))?;

    Ok(TlsAcceptors {
        main: TlsAcceptor::from(Arc::new(main)),
        control: TlsAcceptor::from(Arc::new(control)),
    })
}

fn load_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let pem = std::fs::read(path)
        .map_err(|e| ServerError::Config(format!("cannot read {}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("cannot parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ServerError::Config(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn clone_key(key: &PrivatePkcs8KeyDer<'static>) -> PrivatePkcs8KeyDer<'static> {
    PrivatePkcs8KeyDer::from(key.secret_pkcs8_der().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptors_build_from_generated_pki() {
        let dir = tempfile::tempdir().unwrap();
        let pki = CertificateAuthority::new(dir.path());
        pki.ensure_server_credentials("localhost", "testpass")
            .unwrap();

        let acceptors = build_acceptors(&pki, "testpass");
        assert!(acceptors.is_ok());
    }

    #[test]
    fn wrong_key_password_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let pki = CertificateAuthority::new(dir.path());
        pki.ensure_server_credentials("localhost", "testpass")
            .unwrap();

        assert!(build_acceptors(&pki, "wrong").is_err());
    }
}
