//! TLS client setup, handshake and connection metadata.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::NetError;
use crate::util::with_deadline;

/// Root CA value that turns verification off.
pub const SKIP_VERIFY_SENTINEL: &str = "skip";

const UNKNOWN_VERSION: &str = "unknown";

/// Wire version codes and their display labels.
const TLS_VERSIONS: [(u16, &str); 4] = [
    (0x0301, "TLS1.0"),
    (0x0302, "TLS1.1"),
    (0x0303, "TLS1.2"),
    (0x0304, "TLS1.3"),
];

/// How the TLS client should trust servers and what it offers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub insecure: bool,
    pub root_ca: Option<PathBuf>,
    pub alpn: Vec<String>,
}

impl TlsSettings {
    /// Build from the command-line view: `--insecure` and `--rootca`, where a
    /// root CA of `skip` also disables verification.
    pub fn from_flags(insecure: bool, root_ca: Option<&str>, alpn: Vec<String>) -> Self {
        match root_ca {
            Some(SKIP_VERIFY_SENTINEL) => Self {
                insecure: true,
                root_ca: None,
                alpn,
            },
            Some("") | None => Self {
                insecure,
                root_ca: None,
                alpn,
            },
            Some(path) => Self {
                insecure,
                root_ca: Some(PathBuf::from(path)),
                alpn,
            },
        }
    }

    pub fn connector(&self) -> Result<TlsConnector> {
        Ok(TlsConnector::from(Arc::new(self.client_config()?)))
    }

    fn client_config(&self) -> Result<ClientConfig> {
        ensure_crypto_provider();

        let mut config = if self.insecure {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipVerification::new()))
                .with_no_client_auth()
        } else {
            ClientConfig::builder()
                .with_root_certificates(self.root_store()?)
                .with_no_client_auth()
        };
        config.alpn_protocols = self.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
        Ok(config)
    }

    fn root_store(&self) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();
        match &self.root_ca {
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
            Some(path) => {
                let certs = CertificateDer::pem_file_iter(path)
                    .with_context(|| format!("reading root CA file {}", path.display()))?;
                for cert in certs {
                    let cert = cert.with_context(|| format!("parsing root CA file {}", path.display()))?;
                    roots
                        .add(cert)
                        .with_context(|| format!("adding root CA from {}", path.display()))?;
                }
                anyhow::ensure!(!roots.is_empty(), "no certificates found in {}", path.display());
            }
        }
        Ok(roots)
    }
}

/// Install the ring provider as process default. A provider that is already
/// installed wins.
fn ensure_crypto_provider() {
    let _ = CryptoProvider::install_default(rustls::crypto::ring::default_provider());
}

/// Negotiated parameters of a finished handshake, already labelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMetadata {
    pub version: String,
    pub alpn: String,
    pub cipher: String,
    pub sni: String,
}

impl TlsMetadata {
    pub fn from_connection(conn: &ClientConnection, sni: &str) -> Self {
        let version = conn
            .protocol_version()
            .map(|v| version_label(u16::from(v)))
            .unwrap_or(UNKNOWN_VERSION)
            .to_string();
        let alpn = conn
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default();
        let cipher = conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
            .unwrap_or_default();
        Self {
            version,
            alpn,
            cipher,
            sni: sni.to_string(),
        }
    }
}

/// Label for a TLS wire version; versions missing from the table map to a
/// placeholder.
pub fn version_label(code: u16) -> &'static str {
    TLS_VERSIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
        .unwrap_or(UNKNOWN_VERSION)
}

/// Run a client handshake over an established stream, sending `server_name`
/// as SNI when it is a DNS name.
pub async fn handshake<IO>(
    connector: &TlsConnector,
    server_name: &str,
    io: IO,
    timeout: Duration,
) -> Result<TlsStream<IO>, NetError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|_| NetError::InvalidServerName(server_name.to_string()))?;
    with_deadline("tls handshake", timeout, connector.connect(name, io)).await
}

/// Accepts any certificate but still checks handshake signatures, so the
/// negotiated parameters are real.
#[derive(Debug)]
struct SkipVerification(Arc<CryptoProvider>);

impl SkipVerification {
    fn new() -> Self {
        Self(Arc::new(rustls::crypto::ring::default_provider()))
    }
}

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
