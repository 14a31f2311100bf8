//! C3: the per-session state machine. A pure value type — `step` never
//! suspends, allocates on a slow path, or reaches outside its own fields.

use chrono::Utc;

use crate::command::Command;
use crate::data::DataError;
use crate::envelope::{Envelope, Transaction};
use crate::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initial,
    Greeted,
    Mail,
    Recipient,
    Data,
    Quit,
}

/// The result of feeding one command to the state machine.
#[derive(Debug)]
pub enum Outcome {
    /// The command was accepted; the state machine has already moved to its
    /// new state and mutated the transaction as needed.
    Accepted(Response),
    /// The command was rejected; state and transaction are unchanged.
    Rejected(Response),
    /// Emit the response, then close the transport. Terminal.
    Close(Response),
    /// STARTTLS was accepted. The caller MUST perform the upgrade sequence
    /// of the buffer-clearance contract before any further read, then call
    /// [`Fsm::confirm_tls`].
    BeginTls(Response),
}

/// Fixed, session-lifetime configuration the state machine needs to answer
/// EHLO and enforce the optional recipient cap. Everything else in
/// `ServerConfig` is the session driver's concern, not the FSM's.
#[derive(Debug, Clone)]
pub struct FsmConfig {
    pub domain: String,
    pub max_message_size: usize,
    pub tls_available: bool,
    pub max_recipients: Option<usize>,
}

pub struct Fsm {
    config: FsmConfig,
    state: State,
    tls_active: bool,
    transaction: Option<Transaction>,
}

impl Fsm {
    #[must_use]
    pub fn new(config: FsmConfig) -> Self {
        Self {
            config,
            state: State::Initial,
            tls_active: false,
            transaction: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub const fn is_tls_active(&self) -> bool {
        self.tls_active
    }

    #[must_use]
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// Called once the TLS handshake following a `BeginTls` outcome has
    /// succeeded. Monotonic: never un-sets `tls_active`.
    pub fn confirm_tls(&mut self) {
        self.tls_active = true;
    }

    fn capabilities(&self) -> Vec<String> {
        let mut caps = Vec::new();
        if self.config.max_message_size > 0 {
            caps.push(format!("SIZE {}", self.config.max_message_size));
        } else {
            caps.push("SIZE".to_string());
        }
        caps.push("8BITMIME".to_string());
        if self.config.tls_available && !self.tls_active {
            caps.push("STARTTLS".to_string());
        }
        caps
    }

    fn greet(&mut self, ehlo: bool) -> Outcome {
        self.state = State::Greeted;
        self.transaction = None;
        let response = if ehlo {
            Response::ehlo(&self.config.domain, &self.capabilities())
        } else {
            Response::ok(format!("{} Hello", self.config.domain))
        };
        Outcome::Accepted(response)
    }

    fn reset(&mut self) -> Outcome {
        self.transaction = None;
        if !matches!(self.state, State::Initial | State::Quit) {
            self.state = State::Greeted;
        }
        Outcome::Accepted(Response::ok("OK"))
    }

    fn noop() -> Outcome {
        Outcome::Accepted(Response::ok("OK"))
    }

    fn quit(&mut self) -> Outcome {
        self.state = State::Quit;
        Outcome::Close(Response::closing(&self.config.domain))
    }

    fn mail_from(&mut self, reverse_path: Option<String>) -> Outcome {
        self.transaction = Some(Transaction::new(reverse_path, Utc::now()));
        self.state = State::Mail;
        Outcome::Accepted(Response::ok("Sender OK"))
    }

    fn rcpt_to(&mut self, forward_path: Option<String>) -> Outcome {
        let Some(forward_path) = forward_path else {
            return Outcome::Rejected(Response::syntax_error_in_parameters(
                "Null forward path is invalid",
            ));
        };

        let Some(txn) = self.transaction.as_mut() else {
            // Unreachable given the state table (RCPT_TO only steps from
            // Mail/Recipient, both of which carry a transaction), but a
            // state machine should never panic on a malformed internal
            // invariant in a network-facing process.
            return Outcome::Rejected(Response::bad_sequence("Bad sequence of commands"));
        };

        if let Some(limit) = self.config.max_recipients {
            if txn.recipients.len() >= limit {
                return Outcome::Rejected(Response::too_many_recipients());
            }
        }

        txn.recipients.push(forward_path);
        self.state = State::Recipient;
        Outcome::Accepted(Response::ok("Recipient OK"))
    }

    fn begin_data(&mut self) -> Outcome {
        self.state = State::Data;
        Outcome::Accepted(Response::start_mail_input())
    }

    fn start_tls(&mut self) -> Outcome {
        if !self.config.tls_available {
            return Outcome::Rejected(Response::not_implemented("TLS not available"));
        }
        if self.tls_active {
            return Outcome::Rejected(Response::not_implemented("TLS already active"));
        }
        self.state = State::Initial;
        self.transaction = None;
        Outcome::BeginTls(Response::new(220, "Ready to start TLS"))
    }

    /// Advances the machine by one command. Never valid while `state() ==
    /// State::Data`; the session must not call this during the DATA phase.
    pub fn step(&mut self, command: Command) -> Outcome {
        debug_assert_ne!(
            self.state,
            State::Data,
            "the session must not feed commands to the FSM during DATA"
        );

        match command {
            Command::Unknown(_) => Outcome::Rejected(Response::syntax_error(
                "Syntax error, command unrecognized",
            )),
            Command::Vrfy(_) => Outcome::Rejected(Response::not_implemented(
                "VRFY not implemented",
            )),
            _ if self.state == State::Quit => {
                Outcome::Rejected(Response::bad_sequence("Bad sequence of commands"))
            }
            Command::Helo(_) => self.greet(false),
            Command::Ehlo(_) => self.greet(true),
            Command::Rset => self.reset(),
            Command::Noop => Self::noop(),
            Command::Quit => self.quit(),
            Command::StartTls => match self.state {
                State::Greeted => self.start_tls(),
                _ => Outcome::Rejected(Response::bad_sequence("Bad sequence of commands")),
            },
            Command::MailFrom { reverse_path, .. } => match self.state {
                State::Greeted => self.mail_from(reverse_path),
                _ => Outcome::Rejected(Response::bad_sequence("Bad sequence of commands")),
            },
            Command::RcptTo { forward_path, .. } => match self.state {
                State::Mail | State::Recipient => self.rcpt_to(forward_path),
                _ => Outcome::Rejected(Response::bad_sequence("Bad sequence of commands")),
            },
            Command::Data => match self.state {
                State::Recipient => self.begin_data(),
                _ => Outcome::Rejected(Response::bad_sequence("Bad sequence of commands")),
            },
        }
    }

    /// Called by the session once the DATA receiver reports the body was too
    /// long or over the configured size cap. Always returns to `Greeted` and
    /// discards the transaction; the connection is not closed.
    pub fn abort_data(&mut self, error: DataError) -> Response {
        self.transaction = None;
        self.state = State::Greeted;
        match error {
            DataError::SizeExceeded => Response::size_exceeded(),
            DataError::LineTooLong => Response::syntax_error("Line too long"),
        }
    }

    /// Called by the session once the DATA receiver completed and the host
    /// message handler has run. Always returns to `Greeted` and discards the
    /// transaction, whether or not the handler succeeded.
    pub fn complete_data(&mut self, handler_succeeded: bool) -> (Envelope, Response) {
        let txn = self.transaction.take().unwrap_or_else(|| {
            Transaction::new(None, Utc::now())
        });
        self.state = State::Greeted;
        let response = if handler_succeeded {
            Response::ok("Message accepted for delivery")
        } else {
            Response::local_error("Requested action aborted: local error in processing")
        };
        (txn.into(), response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fsm() -> Fsm {
        Fsm::new(FsmConfig {
            domain: "mail.example.com".to_string(),
            max_message_size: 10_485_760,
            tls_available: true,
            max_recipients: None,
        })
    }

    fn fsm_no_tls() -> Fsm {
        Fsm::new(FsmConfig {
            domain: "mail.example.com".to_string(),
            max_message_size: 0,
            tls_available: false,
            max_recipients: None,
        })
    }

    #[test]
    fn mail_from_before_helo_is_rejected_state_unchanged() {
        let mut m = fsm();
        let outcome = m.step(Command::parse("MAIL FROM:<a@x>"));
        assert!(matches!(outcome, Outcome::Rejected(r) if r.code() == 503));
        assert_eq!(m.state(), State::Initial);
    }

    #[test]
    fn happy_path_through_data() {
        let mut m = fsm();
        assert!(matches!(m.step(Command::parse("EHLO client.test")), Outcome::Accepted(_)));
        assert_eq!(m.state(), State::Greeted);

        assert!(matches!(m.step(Command::parse("MAIL FROM:<a@x>")), Outcome::Accepted(_)));
        assert_eq!(m.state(), State::Mail);

        assert!(matches!(m.step(Command::parse("RCPT TO:<b@y>")), Outcome::Accepted(_)));
        assert_eq!(m.state(), State::Recipient);

        let outcome = m.step(Command::parse("DATA"));
        assert!(matches!(outcome, Outcome::Accepted(r) if r.code() == 354));
        assert_eq!(m.state(), State::Data);

        let (envelope, response) = m.complete_data(true);
        assert_eq!(response.code(), 250);
        assert_eq!(m.state(), State::Greeted);
        assert_eq!(envelope.reverse_path, Some("a@x".to_string()));
        assert_eq!(envelope.recipients, vec!["b@y".to_string()]);
        assert!(m.transaction().is_none());
    }

    #[test]
    fn handler_failure_still_returns_to_greeted_and_clears_transaction() {
        let mut m = fsm();
        m.step(Command::parse("EHLO client.test"));
        m.step(Command::parse("MAIL FROM:<a@x>"));
        m.step(Command::parse("RCPT TO:<b@y>"));
        m.step(Command::parse("DATA"));
        let (_, response) = m.complete_data(false);
        assert_eq!(response.code(), 451);
        assert_eq!(m.state(), State::Greeted);
        assert!(m.transaction().is_none());
    }

    #[test]
    fn null_reverse_path_accepted_null_forward_path_rejected() {
        let mut m = fsm();
        m.step(Command::parse("EHLO client.test"));
        assert!(matches!(
            m.step(Command::parse("MAIL FROM:<>")),
            Outcome::Accepted(_)
        ));
        let outcome = m.step(Command::parse("RCPT TO:<>"));
        assert!(matches!(outcome, Outcome::Rejected(r) if r.code() == 501));
        // rejected RCPT does not move state
        assert_eq!(m.state(), State::Mail);
    }

    #[test]
    fn rset_clears_transaction_but_preserves_greeting() {
        let mut m = fsm();
        m.step(Command::parse("EHLO client.test"));
        m.step(Command::parse("MAIL FROM:<a@x>"));
        m.step(Command::parse("RSET"));
        assert_eq!(m.state(), State::Greeted);
        assert!(m.transaction().is_none());
    }

    #[test]
    fn rset_after_rset_is_idempotent() {
        let mut m = fsm();
        m.step(Command::parse("EHLO client.test"));
        m.step(Command::parse("RSET"));
        let s1 = m.state();
        m.step(Command::parse("RSET"));
        assert_eq!(m.state(), s1);
    }

    #[test]
    fn vrfy_always_502_generic_no_echo() {
        let mut m = fsm();
        let outcome = m.step(Command::parse("VRFY postmaster"));
        match outcome {
            Outcome::Rejected(r) => {
                assert_eq!(r.code(), 502);
                assert!(!r.lines()[0].contains("postmaster"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn starttls_unavailable_is_502() {
        let mut m = fsm_no_tls();
        m.step(Command::parse("EHLO client.test"));
        let outcome = m.step(Command::parse("STARTTLS"));
        assert!(matches!(outcome, Outcome::Rejected(r) if r.code() == 502));
    }

    #[test]
    fn starttls_returns_to_initial_and_mail_from_without_reehlo_is_rejected() {
        let mut m = fsm();
        m.step(Command::parse("EHLO client.test"));
        let outcome = m.step(Command::parse("STARTTLS"));
        assert!(matches!(outcome, Outcome::BeginTls(r) if r.code() == 220));
        assert_eq!(m.state(), State::Initial);
        m.confirm_tls();
        assert!(m.is_tls_active());

        let outcome = m.step(Command::parse("MAIL FROM:<a@x>"));
        assert!(matches!(outcome, Outcome::Rejected(r) if r.code() == 503));
    }

    #[test]
    fn starttls_already_active_is_502() {
        let mut m = fsm();
        m.step(Command::parse("EHLO client.test"));
        m.step(Command::parse("STARTTLS"));
        m.confirm_tls();
        m.step(Command::parse("EHLO client.test"));
        let outcome = m.step(Command::parse("STARTTLS"));
        assert!(matches!(outcome, Outcome::Rejected(r) if r.code() == 502));
    }

    #[test]
    fn ehlo_omits_starttls_capability_once_active() {
        let mut m = fsm();
        if let Outcome::Accepted(r) = m.step(Command::parse("EHLO client.test")) {
            assert!(r.lines().iter().any(|l| l.contains("STARTTLS")));
        } else {
            panic!("expected Accepted");
        }
        m.step(Command::parse("STARTTLS"));
        m.confirm_tls();
        if let Outcome::Accepted(r) = m.step(Command::parse("EHLO client.test")) {
            assert!(!r.lines().iter().any(|l| l.contains("STARTTLS")));
        } else {
            panic!("expected Accepted");
        }
    }

    #[test]
    fn max_recipients_enforced_when_configured() {
        let mut m = Fsm::new(FsmConfig {
            domain: "mail.example.com".to_string(),
            max_message_size: 0,
            tls_available: false,
            max_recipients: Some(1),
        });
        m.step(Command::parse("EHLO client.test"));
        m.step(Command::parse("MAIL FROM:<a@x>"));
        assert!(matches!(
            m.step(Command::parse("RCPT TO:<b@y>")),
            Outcome::Accepted(_)
        ));
        let outcome = m.step(Command::parse("RCPT TO:<c@z>"));
        assert!(matches!(outcome, Outcome::Rejected(r) if r.code() == 452));
    }

    #[test]
    fn quit_is_terminal() {
        let mut m = fsm();
        let outcome = m.step(Command::parse("QUIT"));
        assert!(matches!(outcome, Outcome::Close(r) if r.code() == 221));
        assert_eq!(m.state(), State::Quit);
        let outcome = m.step(Command::parse("NOOP"));
        assert!(matches!(outcome, Outcome::Rejected(r) if r.code() == 503));
    }

    #[test]
    fn unknown_command_is_500_from_any_state() {
        let mut m = fsm();
        let outcome = m.step(Command::parse("FROBNICATE"));
        assert!(matches!(outcome, Outcome::Rejected(r) if r.code() == 500));
    }

    #[test]
    fn data_without_recipient_is_rejected() {
        let mut m = fsm();
        m.step(Command::parse("EHLO client.test"));
        m.step(Command::parse("MAIL FROM:<a@x>"));
        let outcome = m.step(Command::parse("DATA"));
        assert!(matches!(outcome, Outcome::Rejected(r) if r.code() == 503));
    }
}
