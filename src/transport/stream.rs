//! Stream socket setup shared by the TCP and WebSocket drivers.

use std::net::SocketAddr;
#[cfg(feature = "tls")]
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::core::TransportError;

/// A connected byte stream, plain or TLS.
pub(crate) trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

pub(crate) type BoxedStream = Box<dyn IoStream>;

/// Resolve `host:port` to every address it names.
pub(crate) async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    if addrs.is_empty() {
        return Err(TransportError::Resolve(format!("{host}:{port}")));
    }
    Ok(addrs)
}

/// TLS settings of one connect.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TlsTarget<'a> {
    /// Name checked against the server certificate.
    pub(crate) server_name: &'a str,
    /// PEM file with the trusted CA certificates.
    pub(crate) ca_file: Option<&'a std::path::Path>,
}

/// Connect to `addr` within `timeout`, optionally wrapping the socket in TLS.
pub(crate) async fn connect(
    addr: SocketAddr,
    timeout: Duration,
    nodelay: bool,
    tls: Option<TlsTarget<'_>>,
) -> Result<BoxedStream, TransportError> {
    let tcp = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::ConnectTimeout)??;
    tcp.set_nodelay(nodelay)?;

    match tls {
        None => Ok(Box::new(tcp)),
        Some(target) => wrap_tls(tcp, target, timeout).await,
    }
}

#[cfg(feature = "tls")]
async fn wrap_tls(
    tcp: TcpStream,
    target: TlsTarget<'_>,
    timeout: Duration,
) -> Result<BoxedStream, TransportError> {
    use tokio_rustls::rustls::pki_types::ServerName;

    let connector = tls_connector(target.ca_file)?;
    let name = ServerName::try_from(target.server_name.to_string())
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let stream = tokio::time::timeout(timeout, connector.connect(name, tcp))
        .await
        .map_err(|_| TransportError::ConnectTimeout)?
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "tls"))]
async fn wrap_tls(
    _tcp: TcpStream,
    _target: TlsTarget<'_>,
    _timeout: Duration,
) -> Result<BoxedStream, TransportError> {
    Err(TransportError::Tls("tls support is not enabled".into()))
}

#[cfg(feature = "tls")]
fn tls_connector(ca_file: Option<&Path>) -> Result<tokio_rustls::TlsConnector, TransportError> {
    use std::sync::Arc;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore, crypto::ring};

    let Some(ca_file) = ca_file else {
        return Err(TransportError::Tls("no CA certificate file".into()));
    };
    let pem = std::fs::read(ca_file)?;
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        roots
            .add(cert?)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
    }
    if roots.is_empty() {
        return Err(TransportError::Tls(format!(
            "no certificates in {}",
            ca_file.display()
        )));
    }

    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(tokio_rustls::TlsConnector::from(Arc::new(config)))
}
