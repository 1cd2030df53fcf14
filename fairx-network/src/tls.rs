/*!
TLS material loading and configuration

Both ends authenticate with X.509 certificates. A listener requires and
verifies client certificates against the trusted CA roots when mutual
authentication is on. Verification can only be disabled through an
explicit [`TrustPolicy::Unverified`].
*/

use anyhow::{anyhow, bail, Context as _, Result};
use cryptoxide::{digest::Digest as _, sha2::Sha256};
use pkcs8::{der::Decode as _, EncryptedPrivateKeyInfo};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio_rustls::rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime},
    server::WebPkiClientVerifier,
    ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};

const ENCRYPTED_PRIVATE_KEY: &str = "ENCRYPTED PRIVATE KEY";

/// a certificate chain and its private key, PEM encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub cert_chain: PathBuf,
    pub key: PathBuf,
    /// passphrase of an encrypted PKCS#8 key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_password: Option<String>,
}

/// how the certificates presented by the remote peer are checked
#[derive(Debug, Clone)]
pub enum TrustPolicy {
    Verify(Arc<RootCertStore>),
    Unverified,
}

impl TrustPolicy {
    /// trust the CA certificates in `ca_cert`
    ///
    /// If no CA certificate is available, peers are left unverified only
    /// when `allow_unverified` is set, otherwise this fails.
    pub fn from_ca(ca_cert: Option<&Path>, allow_unverified: bool) -> Result<Self> {
        match ca_cert {
            Some(path) if path.exists() => load_roots(path).map(|roots| Self::Verify(Arc::new(roots))),
            missing if allow_unverified => {
                tracing::warn!(
                    ca_cert = ?missing,
                    "no CA certificate available, peer certificates will not be verified"
                );
                Ok(Self::Unverified)
            }
            Some(path) => bail!("CA certificate {} not found", path.display()),
            None => bail!("No CA certificate configured to verify peers"),
        }
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = std::fs::read(path)
        .with_context(|| format!("Cannot read certificates {}", path.display()))?;
    let certificates = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Cannot parse certificates {}", path.display()))?;

    if certificates.is_empty() {
        bail!("No certificate found in {}", path.display());
    }
    Ok(certificates)
}

/// load a PEM private key, decrypting it with `password` if it is an
/// encrypted PKCS#8 key
pub fn load_private_key(path: &Path, password: Option<&str>) -> Result<PrivateKeyDer<'static>> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read private key {}", path.display()))?;

    if pem.contains(ENCRYPTED_PRIVATE_KEY) {
        let password = password.with_context(|| {
            format!("Private key {} is encrypted, no password given", path.display())
        })?;
        let (_, document) = pkcs8::Document::from_pem(&pem)
            .map_err(|error| anyhow!("Cannot parse private key {}: {}", path.display(), error))?;
        let info = EncryptedPrivateKeyInfo::from_der(document.as_bytes())
            .map_err(|error| anyhow!("Cannot parse private key {}: {}", path.display(), error))?;
        let decrypted = info
            .decrypt(password)
            .map_err(|error| anyhow!("Cannot decrypt private key {}: {}", path.display(), error))?;

        return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            decrypted.as_bytes().to_vec(),
        )));
    }

    rustls_pemfile::private_key(&mut pem.as_bytes())
        .with_context(|| format!("Cannot parse private key {}", path.display()))?
        .with_context(|| format!("No private key found in {}", path.display()))
}

pub fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for certificate in load_certificates(path)? {
        roots
            .add(certificate)
            .with_context(|| format!("Invalid CA certificate in {}", path.display()))?;
    }
    Ok(roots)
}

/// TLS configuration of a listener
pub fn acceptor(credentials: &Credentials, trust: &TrustPolicy, mutual_auth: bool) -> Result<TlsAcceptor> {
    let provider = provider();
    let certificates = load_certificates(&credentials.cert_chain)?;
    let key = load_private_key(&credentials.key, credentials.key_password.as_deref())?;

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .context("Invalid TLS protocol versions")?;

    let builder = match (mutual_auth, trust) {
        (true, TrustPolicy::Verify(roots)) => {
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::clone(roots), provider)
                .build()
                .context("Cannot build the client certificate verifier")?;
            builder.with_client_cert_verifier(verifier)
        }
        (true, TrustPolicy::Unverified) => {
            tracing::warn!("client certificates will not be requested");
            builder.with_no_client_auth()
        }
        (false, _) => builder.with_no_client_auth(),
    };

    let config = builder
        .with_single_cert(certificates, key)
        .context("Invalid server certificate or key")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// TLS configuration of a client, `credentials` are presented to the
/// listener when it requests a client certificate
pub fn connector(credentials: Option<&Credentials>, trust: &TrustPolicy) -> Result<TlsConnector> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .context("Invalid TLS protocol versions")?;

    let builder = match trust {
        TrustPolicy::Verify(roots) => builder.with_root_certificates(Arc::clone(roots)),
        TrustPolicy::Unverified => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoServerVerification(provider))),
    };

    let config = match credentials {
        Some(credentials) => {
            let certificates = load_certificates(&credentials.cert_chain)?;
            let key = load_private_key(&credentials.key, credentials.key_password.as_deref())?;
            builder
                .with_client_auth_cert(certificates, key)
                .context("Invalid client certificate or key")?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

pub fn server_name(name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(name.to_owned()).with_context(|| format!("Invalid server name {}", name))
}

/// hex encoded SHA-256 fingerprint of the peer's end entity certificate
pub fn peer_identity(certificates: Option<&[CertificateDer<'_>]>) -> Option<String> {
    let certificate = certificates?.first()?;
    let mut hasher = Sha256::new();
    hasher.input(certificate.as_ref());
    let mut fingerprint = [0; 32];
    hasher.result(&mut fingerprint);
    Some(hex::encode(fingerprint))
}

#[derive(Debug)]
struct NoServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
