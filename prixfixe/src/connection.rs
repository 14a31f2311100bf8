//! C7: transport abstraction as a sum type rather than dynamic dispatch.
//!
//! `Connection<S>` carries no line-buffering state of its own — that lives
//! in [`crate::reader::LineReader`], owned by the `Session`. Keeping the
//! buffer off this type is what makes STARTTLS buffer clearance a matter of
//! dropping the `Session`'s buffer rather than trusting a stream wrapper to
//! forget bytes across a `Plain` → `Tls` transition it wasn't built to
//! guarantee.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use prixfixe_common::config::TlsMaterial;
use prixfixe_common::error::{ConnectionError, TlsError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ProtocolVersion, ServerConfig as RustlsServerConfig, ServerConnection, SupportedCipherSuite};
use tokio_rustls::{server::TlsStream, TlsAcceptor};

/// Negotiated TLS parameters, surfaced for host-side observability only; the
/// core does not act on these values.
#[derive(Debug, Clone)]
pub struct TlsInfo {
    version: ProtocolVersion,
    cipher: SupportedCipherSuite,
}

impl TlsInfo {
    fn of(conn: &ServerConnection) -> Result<Self, TlsError> {
        Ok(Self {
            version: conn
                .protocol_version()
                .ok_or_else(|| TlsError::Rustls("protocol version unavailable".to_string()))?,
            cipher: conn
                .negotiated_cipher_suite()
                .ok_or_else(|| TlsError::Rustls("cipher suite unavailable".to_string()))?,
        })
    }

    #[must_use]
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    #[must_use]
    pub fn cipher_suite_name(&self) -> &'static str {
        self.cipher.suite().as_str().unwrap_or("unknown")
    }
}

/// Byte stream with an in-place TLS upgrade point. `start_tls` consumes
/// `self` and returns a new `Connection`, making "no downgrade" a type-level
/// property: once a caller holds `Connection::Tls`, there is no API that
/// turns it back into `Connection::Plain`.
pub enum Connection<S: AsyncRead + AsyncWrite + Unpin + Send> {
    Plain(S),
    Tls(Box<TlsStream<S>>),
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Connection<S> {
    #[must_use]
    pub fn plain(stream: S) -> Self {
        Self::Plain(stream)
    }

    #[must_use]
    pub const fn is_tls_active(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Reads at least one byte, or returns `Ok(0)` on orderly EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ConnectionError> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        Ok(n)
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        match self {
            Self::Plain(stream) => stream.write_all(bytes).await?,
            Self::Tls(stream) => stream.write_all(bytes).await?,
        }
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        match self {
            Self::Plain(stream) => stream.shutdown().await?,
            Self::Tls(stream) => stream.shutdown().await?,
        }
        Ok(())
    }

    fn load_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
        let file = File::open(path).map_err(|source| TlsError::CertificateLoad {
            path: path.display().to_string(),
            source,
        })?;
        rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|source| TlsError::CertificateLoad {
                path: path.display().to_string(),
                source,
            })
    }

    fn load_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>, TlsError> {
        let path_str = path.display().to_string();
        let mut reader = BufReader::new(File::open(path).map_err(|e| TlsError::KeyLoad {
            path: path_str.clone(),
            reason: e.to_string(),
        })?);

        match rustls_pemfile::read_one(&mut reader).map_err(|e| TlsError::KeyLoad {
            path: path_str.clone(),
            reason: e.to_string(),
        })? {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => Ok(PrivateKeyDer::Sec1(key)),
            _ => Err(TlsError::KeyLoad {
                path: path_str,
                reason: "unable to determine key format (expected PKCS1, PKCS8, or SEC1)"
                    .to_string(),
            }),
        }
    }

    /// Upgrades a `Plain` connection to `Tls`. Valid only when not already
    /// TLS-active; the caller (the state machine, via `Outcome::BeginTls`)
    /// is responsible for that precondition.
    ///
    /// On failure, the original stream is dropped along with `self` — the
    /// caller must treat this as a terminal connection error and close.
    pub async fn start_tls(self, material: &TlsMaterial) -> Result<(Self, TlsInfo), TlsError> {
        let Self::Plain(stream) = self else {
            return Err(TlsError::Rustls("TLS already active".to_string()));
        };

        let certs = Self::load_certs(&material.certificate)?;
        let key = Self::load_key(&material.key)?;

        let config = RustlsServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::Rustls(e.to_string()))?;

        let acceptor = TlsAcceptor::from(Arc::new(config));
        let tls_stream = acceptor
            .accept(stream)
            .await
            .map_err(TlsError::Handshake)?;
        let info = TlsInfo::of(tls_stream.get_ref().1)?;

        Ok((Self::Tls(Box::new(tls_stream)), info))
    }
}

impl Connection<tokio::net::TcpStream> {
    #[must_use]
    pub fn peer_address(&self) -> std::io::Result<SocketAddr> {
        match self {
            Self::Plain(stream) => stream.peer_addr(),
            Self::Tls(stream) => stream.get_ref().0.peer_addr(),
        }
    }
}
