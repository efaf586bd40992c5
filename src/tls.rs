use std::fmt;
use std::io;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{Error, Result};

/// Client side TLS parameters: who we expect to talk to and which roots we trust.
#[derive(Clone)]
pub struct TlsSettings {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsSettings {
    /// Trusts the bundled web PKI roots and verifies the server certificate against `host`.
    pub fn new(host: &str) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self::with_config(host, config)
    }

    pub fn with_config(host: &str, config: ClientConfig) -> Result<Self> {
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| Error::InvalidConfig(format!("invalid TLS server name {host:?}: {e}")))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    pub(crate) async fn handshake(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
        debug!(server_name = ?self.server_name, "starting TLS handshake");

        self.connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| match e.kind() {
                // A peer hanging up mid-handshake is an ordinary transport failure.
                io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => Error::Io(e),
                _ => Error::Tls(e),
            })
    }
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}
