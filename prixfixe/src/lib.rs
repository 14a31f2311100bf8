//! An embeddable SMTP receive server.
//!
//! ```no_run
//! use prixfixe::{handler::NullHandler, Server, ServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::builder().domain("mail.example.com").port(2525).build();
//! let server = Server::new(config, NullHandler);
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod handler;
pub mod reader;
pub mod server;
pub mod session;

pub use connection::{Connection, TlsInfo};
pub use handler::MessageHandler;
pub use prixfixe_common::{ServerConfig, ServerConfigBuilder, TlsMaterial};
pub use server::Server;
pub use session::Session;
