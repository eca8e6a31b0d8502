//! Outbound connection to the IRC server.
//!
//! One dial attempt per session: resolve, connect, optionally wrap in TLS.
//! Nothing here retries; a failure ends the session before any relaying.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

use super::stream::IrcStream;
use crate::config::IrcConfig;
use crate::error::BridgeError;

/// Where sessions are bridged to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcTarget {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl IrcTarget {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }

    fn display_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl From<&IrcConfig> for IrcTarget {
    fn from(cfg: &IrcConfig) -> Self {
        Self::new(cfg.host.clone(), cfg.port, cfg.tls)
    }
}

/// Opens connections to IRC servers. The TLS client configuration is built
/// once and shared by every session.
#[derive(Clone)]
pub struct IrcDialer {
    tls: TlsConnector,
}

impl IrcDialer {
    pub fn new(accept_invalid_certs: bool) -> Result<Self, rustls::Error> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let config = if accept_invalid_certs {
            warn!("IRC server certificates will not be verified");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
                .with_no_client_auth()
        } else {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        };

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }

    pub async fn connect(&self, target: &IrcTarget) -> Result<IrcStream, BridgeError> {
        let addrs = resolve(target).await?;
        debug!(target = %target.display_addr(), candidates = addrs.len(), "dialing IRC server");

        let tcp = connect_any(&addrs).await.map_err(|source| BridgeError::Connect {
            target: target.display_addr(),
            source,
        })?;
        if let Err(e) = tcp.set_nodelay(true) {
            trace!(error = %e, "set_nodelay");
        }

        if !target.tls {
            return Ok(IrcStream::Plain(tcp));
        }

        let server_name = ServerName::try_from(target.host.clone()).map_err(|e| {
            BridgeError::Connect {
                target: target.display_addr(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e),
            }
        })?;

        let stream = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(|source| BridgeError::Connect {
                target: target.display_addr(),
                source,
            })?;

        Ok(IrcStream::Tls(Box::new(stream)))
    }
}

async fn resolve(target: &IrcTarget) -> Result<Vec<SocketAddr>, BridgeError> {
    let resolved = tokio::net::lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|source| BridgeError::Resolution {
            target: target.display_addr(),
            source,
        })?;

    let addrs: Vec<SocketAddr> = resolved.collect();
    if addrs.is_empty() {
        return Err(BridgeError::Resolution {
            target: target.display_addr(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        });
    }
    Ok(addrs)
}

/// Try each resolved address in order, returning the first that connects.
async fn connect_any(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses")))
}

/// Skips chain validation but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
