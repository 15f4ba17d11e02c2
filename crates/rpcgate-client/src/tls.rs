//! rustls client setup shared by the streaming transports

use std::io;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

pub(crate) const ALPN_H2: &[u8] = b"h2";
pub(crate) const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Client config trusting the web PKI roots plus the configured extras
pub(crate) fn client_config(config: &ClientConfig, alpn: &[&[u8]]) -> ClientResult<Arc<rustls::ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for cert in &config.root_certificates {
        roots
            .add(cert.clone())
            .map_err(|e| ClientError::config(format!("root certificate: {}", e)))?;
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::config(format!("tls: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    tls.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(Arc::new(tls))
}

/// TLS handshake over an established TCP stream
pub(crate) async fn handshake(
    tls: Arc<rustls::ClientConfig>,
    host: &str,
    tcp: TcpStream,
) -> ClientResult<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ClientError::config(format!("server name {}: {}", host, e)))?;
    TlsConnector::from(tls)
        .connect(server_name, tcp)
        .await
        .map_err(|e| handshake_error(&format!("tls handshake with {}", host), e))
}

/// Whether an I/O error carries a rustls refusal, such as an untrusted
/// certificate, rather than a network failure
pub(crate) fn is_tls_rejection(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<rustls::Error>())
}

/// Network failures stay retryable; a refused handshake does not
pub(crate) fn handshake_error(context: &str, err: io::Error) -> ClientError {
    if is_tls_rejection(&err) {
        ClientError::transport(format!("{}: {}", context, err))
    } else {
        ClientError::ConnectFailed(format!("{}: {}", context, err))
    }
}
