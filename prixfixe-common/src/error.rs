//! Layered error taxonomy. One type per subsystem boundary; lower layers
//! convert into higher ones with `#[from]` so calling code only has to match
//! at the boundary it actually owns.

use std::io;

use thiserror::Error;

/// Failures loading or negotiating TLS material. Owned by the transport
/// layer.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to load certificate from {path}: {source}")]
    CertificateLoad { path: String, source: io::Error },

    #[error("failed to load private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    #[error("TLS handshake failed: {0}")]
    Handshake(#[from] io::Error),

    #[error("rustls configuration rejected: {0}")]
    Rustls(String),
}

/// Failures reading or writing the byte stream. Owned by the transport
/// layer; wraps [`TlsError`] so a `start_tls` failure surfaces through the
/// same channel as a plain I/O failure.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("connection already closed")]
    Closed,
}

impl ConnectionError {
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

/// Failures terminating a session. Owned by the session driver.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("command timed out")]
    CommandTimeout,

    #[error("connection timed out")]
    ConnectionTimeout,

    #[error("shutdown requested")]
    Shutdown,
}

impl SessionError {
    /// `true` for graceful-shutdown termination, as opposed to a client or
    /// transport fault.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimeout | Self::ConnectionTimeout)
    }
}

/// Failures starting or stopping the acceptor. Owned by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {address}: {source}")]
    BindFailed { address: String, source: io::Error },

    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,
}
