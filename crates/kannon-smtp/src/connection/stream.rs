//! Transport setup: TCP connect and TLS handshake.

use crate::error::{Error, Result};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{ClientConfig, RootCertStore},
};

/// Opens a plain TCP connection to the relay.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(hostname: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((hostname, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Runs a TLS handshake over an established TCP connection.
///
/// Used both for implicit TLS and after a successful `STARTTLS`.
///
/// # Errors
///
/// Returns an error if the hostname is not a valid server name or the
/// handshake fails.
pub async fn handshake(hostname: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Tls(format!("Invalid hostname: {hostname}")))?;

    create_tls_connector()
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::Tls(e.to_string()))
}

/// Creates a TLS connector with the webpki root certificates.
fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}
