//! The single seam between transport/protocol plumbing and host application
//! logic: what happens to an accepted message.

use async_trait::async_trait;
use prixfixe_proto::Message;

/// Implemented by the host application to receive completed messages. One
/// call per successful `DATA` transaction; the session has already applied
/// size and recipient-count limits by the time this runs.
///
/// Narrower than a general mail-processing trait on purpose: accept/reject
/// policy (recipient validation, size limits) lives in the state machine
/// and configuration, not here. `deliver` only ever sees transactions the
/// core has already accepted onto the wire.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn deliver(&self, message: Message) -> Result<(), Self::Error>;
}

/// A handler that accepts and immediately discards every message. Useful for
/// tests and for hosts that only care about protocol-level acceptance.
pub struct NullHandler;

#[async_trait]
impl MessageHandler for NullHandler {
    type Error = std::convert::Infallible;

    async fn deliver(&self, _message: Message) -> Result<(), Self::Error> {
        Ok(())
    }
}
