//! Embedded certificate authority.
//!
//! On first startup the server mints its own PKI under a base directory
//! (typically `/var/lib/kazad`): a self-signed CA, a server certificate
//! for both listeners, and, on demand from the control port, per-user
//! client certificates that the main listener's mutual-TLS verifier
//! accepts. All signatures are SHA-256 over RSA.
//!
//! Key handling: the CA key stays unencrypted but owner-readable only;
//! the server key is PEM-encrypted with `ssl/keypassword` (PKCS#8 PBES2;
//! the server is the only consumer and decrypts it itself at startup);
//! client keys are written as unencrypted PKCS#8 because some target
//! clients cannot parse PBES2.

use std::path::{Path, PathBuf};

use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _, LineEnding};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, PKCS_RSA_SHA256, SanType,
    SerialNumber,
};
use rsa::RsaPrivateKey;
use rustls::pki_types::PrivatePkcs8KeyDer;
use time::{Duration, OffsetDateTime};

const CA_KEY_BITS: usize = 4096;
const LEAF_KEY_BITS: usize = 2048;
const VALIDITY_DAYS: i64 = 3650;
const ORGANIZATION: &str = "KaZa";
const COUNTRY: &str = "FR";

/// Certificate authority errors.
#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    /// Filesystem failure under the base directory.
    #[error("pki i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// X.509 construction or signing failure.
    #[error("certificate error: {0}")]
    Certificate(#[from] rcgen::Error),

    /// RSA generation or PKCS#8 (de)serialisation failure.
    #[error("key error: {0}")]
    Key(String),

    /// Username not acceptable as a credential file stem.
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),
}

/// The on-disk certificate authority.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    base_dir: PathBuf,
}

impl CertificateAuthority {
    /// Authority rooted at `base_dir`. Nothing is touched until a
    /// generation entry point runs.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `ca.cert.pem` path.
    #[must_use]
    pub fn ca_cert_path(&self) -> PathBuf {
        self.base_dir.join("ca.cert.pem")
    }

    /// `ca.key` path.
    #[must_use]
    pub fn ca_key_path(&self) -> PathBuf {
        self.base_dir.join("ca.key")
    }

    /// `server.cert.pem` path.
    #[must_use]
    pub fn server_cert_path(&self) -> PathBuf {
        self.base_dir.join("server.cert.pem")
    }

    /// `server.key` path.
    #[must_use]
    pub fn server_key_path(&self) -> PathBuf {
        self.base_dir.join("server.key")
    }

    /// `<username>.cert.pem` path.
    pub fn client_cert_path(&self, username: &str) -> Result<PathBuf, PkiError> {
        Ok(self
            .base_dir
            .join(format!("{}.cert.pem", validated(username)?)))
    }

    /// `<username>.key` path.
    pub fn client_key_path(&self, username: &str) -> Result<PathBuf, PkiError> {
        Ok(self.base_dir.join(format!("{}.key", validated(username)?)))
    }

    /// Ensure CA and server credentials exist, generating them on first
    /// startup. Existing files are left untouched.
    pub fn ensure_server_credentials(
        &self,
        hostname: &str,
        key_password: &str,
    ) -> Result<(), PkiError> {
        std::fs::create_dir_all(&self.base_dir)?;

        if self.ca_cert_path().exists()
            && self.server_cert_path().exists()
            && self.server_key_path().exists()
        {
            tracing::info!("SSL certificates already exist");
            return Ok(());
        }

        tracing::info!("SSL certificates not found, generating new certificates");
        let (ca_cert, ca_key) = self.generate_ca(hostname)?;
        self.generate_server(hostname, key_password, &ca_cert, &ca_key)?;
        tracing::info!(
            "certificates generated under {}",
            self.base_dir.display()
        );
        Ok(())
    }

    /// Ensure client credentials exist for `username`, generating a key
    /// and CA-signed certificate on first request. Repeated calls for the
    /// same user reuse the existing files.
    pub fn ensure_client_credentials(&self, username: &str) -> Result<(), PkiError> {
        if self.client_cert_path(username)?.exists() && self.client_key_path(username)?.exists() {
            return Ok(());
        }
        self.generate_client_certificate(username)
    }

    /// Mint a fresh client key and certificate for `username`, signed by
    /// the on-disk CA.
    pub fn generate_client_certificate(&self, username: &str) -> Result<(), PkiError> {
        tracing::info!("generating client certificate for user {username}");

        let (ca_cert, ca_key) = self.load_ca()?;
        let (client_rsa, client_key) = generate_rsa_keypair(LEAF_KEY_BITS)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject(username);
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(SerialNumber::from(unix_seconds().to_be_bytes().to_vec()));
        set_validity(&mut params);

        let cert = params.signed_by(&client_key, &ca_cert, &ca_key)?;

        let key_pem = client_rsa
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| PkiError::Key(e.to_string()))?;
        write_private(&self.client_key_path(username)?, key_pem.as_bytes())?;
        std::fs::write(self.client_cert_path(username)?, cert.pem())?;
        Ok(())
    }

    /// Decrypt `server.key` with the configured passphrase and hand back
    /// the DER for rustls.
    pub fn load_server_key(&self, key_password: &str) -> Result<PrivatePkcs8KeyDer<'static>, PkiError> {
        let pem = std::fs::read_to_string(self.server_key_path())?;
        let key = RsaPrivateKey::from_pkcs8_encrypted_pem(&pem, key_password)
            .map_err(|e| PkiError::Key(format!("cannot decrypt server key: {e}")))?;
        let der = key
            .to_pkcs8_der()
            .map_err(|e| PkiError::Key(e.to_string()))?;
        Ok(PrivatePkcs8KeyDer::from(der.as_bytes().to_vec()))
    }

    fn generate_ca(&self, hostname: &str) -> Result<(Certificate, KeyPair), PkiError> {
        tracing::info!("generating CA private key ({CA_KEY_BITS}-bit RSA)");
        let (ca_rsa, ca_key) = generate_rsa_keypair(CA_KEY_BITS)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject(&format!("{hostname} CA"));
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.serial_number = Some(SerialNumber::from(vec![1]));
        set_validity(&mut params);

        let cert = params.self_signed(&ca_key)?;

        let key_pem = ca_rsa
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| PkiError::Key(e.to_string()))?;
        write_private(&self.ca_key_path(), key_pem.as_bytes())?;
        std::fs::write(self.ca_cert_path(), cert.pem())?;
        tracing::info!("CA certificate generated");
        Ok((cert, ca_key))
    }

    fn generate_server(
        &self,
        hostname: &str,
        key_password: &str,
        ca_cert: &Certificate,
        ca_key: &KeyPair,
    ) -> Result<(), PkiError> {
        tracing::info!("generating server private key ({LEAF_KEY_BITS}-bit RSA, encrypted)");
        let (server_rsa, server_key) = generate_rsa_keypair(LEAF_KEY_BITS)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject(hostname);
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.subject_alt_names = vec![SanType::DnsName(hostname.try_into()?)];
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(SerialNumber::from(vec![2]));
        set_validity(&mut params);

        let cert = params.signed_by(&server_key, ca_cert, ca_key)?;

        let key_pem = server_rsa
            .to_pkcs8_encrypted_pem(&mut rand::thread_rng(), key_password.as_bytes(), LineEnding::LF)
            .map_err(|e| PkiError::Key(e.to_string()))?;
        write_private(&self.server_key_path(), key_pem.as_bytes())?;
        std::fs::write(self.server_cert_path(), cert.pem())?;
        tracing::info!("server certificate generated");
        Ok(())
    }

    /// Reload the CA from disk for signing client certificates. The
    /// re-built issuer certificate only contributes the issuer name and
    /// key identifier; it is never written anywhere.
    fn load_ca(&self) -> Result<(Certificate, KeyPair), PkiError> {
        let key_pem = std::fs::read_to_string(self.ca_key_path())?;
        let ca_key = KeyPair::from_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)?;

        let cert_pem = std::fs::read_to_string(self.ca_cert_path())?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem)?;
        let cert = params.self_signed(&ca_key)?;
        Ok((cert, ca_key))
    }
}

/// RSA keypair as both the raw key (for PKCS#8 output) and the rcgen
/// signing handle. rcgen signs with existing keys but does not generate
/// RSA, hence the two-crate hand-off.
fn generate_rsa_keypair(bits: usize) -> Result<(RsaPrivateKey, KeyPair), PkiError> {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        .map_err(|e| PkiError::Key(e.to_string()))?;
    let der = key
        .to_pkcs8_der()
        .map_err(|e| PkiError::Key(e.to_string()))?;
    let pkcs8 = PrivatePkcs8KeyDer::from(der.as_bytes().to_vec());
    let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(&pkcs8, &PKCS_RSA_SHA256)?;
    Ok((key, key_pair))
}

fn subject(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, ORGANIZATION);
    dn.push(DnType::CountryName, COUNTRY);
    dn
}

fn set_validity(params: &mut CertificateParams) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(VALIDITY_DAYS);
}

fn unix_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Write a key file readable only by the server process owner.
fn write_private(path: &Path, contents: &[u8]) -> Result<(), PkiError> {
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Usernames become credential file stems; restrict them to a safe
/// character set so `clientconf?` cannot write outside the base directory.
fn validated(username: &str) -> Result<&str, PkiError> {
    let acceptable = !username.is_empty()
        && !username.starts_with('.')
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if acceptable {
        Ok(username)
    } else {
        Err(PkiError::InvalidUsername(username.to_string()))
    }
}
