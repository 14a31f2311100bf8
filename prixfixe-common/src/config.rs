//! Host-facing configuration surface: a `Deserialize`-capable struct plus a
//! fluent builder, so hosts can either load a TOML document or construct a
//! `ServerConfig` by hand.

use std::net::IpAddr;
use std::path::PathBuf;

use serde::Deserialize;

/// Minimum negotiated TLS protocol version the acceptor should allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinTlsVersion {
    Tls12,
    Tls13,
}

/// TLS material, opaque to the protocol core beyond "is TLS configured".
/// Certificate/key loading happens in `prixfixe::connection` at `start_tls`
/// time, not eagerly here.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsMaterial {
    pub certificate: PathBuf,
    pub key: PathBuf,
    #[serde(default)]
    pub min_version: Option<MinTlsVersion>,
    #[serde(default)]
    pub require_client_cert: bool,
    #[serde(default)]
    pub cipher_suites: Option<Vec<String>>,
}

/// Immutable, host-facing configuration for one [`crate::Server`] (see
/// `prixfixe::server`). Deserializable from TOML; also buildable by hand via
/// [`ServerConfig::builder`].
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::domain")]
    pub domain: String,

    #[serde(default = "defaults::bind_address")]
    pub bind_address: IpAddr,

    #[serde(default)]
    pub port: u16,

    #[serde(default = "defaults::max_connections")]
    pub max_connections: usize,

    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "defaults::max_command_length")]
    pub max_command_length: usize,

    /// Whole-session wall-clock cap, in seconds. `0` disables it.
    #[serde(default = "defaults::connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Per-command read cap, in seconds. `0` disables it.
    #[serde(default = "defaults::command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default)]
    pub max_recipients: Option<usize>,

    #[serde(default = "defaults::shutdown_grace_period_secs")]
    pub shutdown_grace_period_secs: u64,

    #[serde(default)]
    pub tls: Option<TlsMaterial>,
}

mod defaults {
    use std::net::{IpAddr, Ipv6Addr};

    pub fn domain() -> String {
        "localhost".to_string()
    }

    pub const fn bind_address() -> IpAddr {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    }

    pub const fn max_connections() -> usize {
        512
    }

    pub const fn max_message_size() -> usize {
        10 * 1024 * 1024
    }

    pub const fn max_command_length() -> usize {
        512
    }

    pub const fn connection_timeout_secs() -> u64 {
        1800
    }

    pub const fn command_timeout_secs() -> u64 {
        300
    }

    pub const fn shutdown_grace_period_secs() -> u64 {
        10
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: defaults::domain(),
            bind_address: defaults::bind_address(),
            port: 0,
            max_connections: defaults::max_connections(),
            max_message_size: defaults::max_message_size(),
            max_command_length: defaults::max_command_length(),
            connection_timeout_secs: defaults::connection_timeout_secs(),
            command_timeout_secs: defaults::command_timeout_secs(),
            max_recipients: None,
            shutdown_grace_period_secs: defaults::shutdown_grace_period_secs(),
            tls: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    #[must_use]
    pub const fn tls_available(&self) -> bool {
        self.tls.is_some()
    }
}

/// Fluent builder over [`ServerConfig`], mirroring the builder-over-struct
/// shape used for session/TLS configuration elsewhere in this codebase.
#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.config.domain = domain.into();
        self
    }

    #[must_use]
    pub const fn bind_address(mut self, addr: IpAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub const fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    #[must_use]
    pub const fn max_message_size(mut self, max: usize) -> Self {
        self.config.max_message_size = max;
        self
    }

    #[must_use]
    pub const fn max_command_length(mut self, max: usize) -> Self {
        self.config.max_command_length = max;
        self
    }

    #[must_use]
    pub const fn connection_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connection_timeout_secs = secs;
        self
    }

    #[must_use]
    pub const fn command_timeout_secs(mut self, secs: u64) -> Self {
        self.config.command_timeout_secs = secs;
        self
    }

    #[must_use]
    pub const fn max_recipients(mut self, max: usize) -> Self {
        self.config.max_recipients = Some(max);
        self
    }

    #[must_use]
    pub const fn shutdown_grace_period_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_grace_period_secs = secs;
        self
    }

    #[must_use]
    pub fn tls(mut self, tls: TlsMaterial) -> Self {
        self.config.tls = Some(tls);
        self
    }

    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}
