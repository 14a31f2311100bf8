//! Wire codec, command grammar, and session state machine for PrixFixe.
//!
//! Nothing in this crate touches an executor or a socket: every type here is
//! a plain value, so the protocol engine (C1-C3, plus the pure half of C4)
//! can be tested without spinning up async I/O.

pub mod command;
pub mod data;
pub mod envelope;
pub mod response;
pub mod state;

pub use command::{Command, Parameters};
pub use data::{DataAccumulator, DataError};
pub use envelope::{Envelope, Message, Transaction};
pub use response::Response;
pub use state::{Fsm, FsmConfig, Outcome, State};
