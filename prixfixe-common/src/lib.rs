//! Shared configuration, error taxonomy, logging, and shutdown signal for
//! PrixFixe. Kept free of the protocol grammar (see `prixfixe-proto`) and of
//! the async transport (see `prixfixe`) so it can be depended on by both.

pub mod config;
pub mod error;
pub mod logging;
pub mod signal;

pub use config::{MinTlsVersion, ServerConfig, ServerConfigBuilder, TlsMaterial};
pub use error::{ConnectionError, ServerError, SessionError, TlsError};
pub use signal::Signal;

// Re-exported so the `log!`/`incoming!`/`outgoing!`/`internal!` macros can
// refer to `$crate::tracing` without every downstream crate needing its own
// `tracing` dependency declaration just to use them.
pub use tracing;
