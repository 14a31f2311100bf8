//! C5: the per-connection driver. Owns the read loop, dispatches parsed
//! commands to the state machine, and runs the DATA phase and the STARTTLS
//! upgrade sequence.

use std::sync::Arc;
use std::time::Duration;

use prixfixe_common::error::{ConnectionError, SessionError, TlsError};
use prixfixe_common::signal::Signal;
use prixfixe_common::ServerConfig;
use prixfixe_proto::{Command, DataAccumulator, DataError, Envelope, Fsm, FsmConfig, Message, Outcome, Response, State};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::time::Instant;

use prixfixe_common::{incoming, internal, outgoing};

use crate::connection::Connection;
use crate::handler::MessageHandler;
use crate::reader::{LineOutcome, LineReader};

/// DATA body lines are capped independently of the command-line cap; RFC
/// 5321 leaves this to local policy, 1000 bytes including CRLF is the
/// conventional SMTP line limit.
const DATA_LINE_CAP: usize = 1000;

fn deadline_from_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

pub struct Session<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: MessageHandler,
{
    conn: Option<Connection<S>>,
    reader: LineReader,
    fsm: Fsm,
    config: Arc<ServerConfig>,
    handler: Arc<H>,
    shutdown: broadcast::Receiver<Signal>,
}

impl<S, H> Session<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: MessageHandler,
{
    #[must_use]
    pub fn new(
        stream: S,
        config: Arc<ServerConfig>,
        handler: Arc<H>,
        shutdown: broadcast::Receiver<Signal>,
    ) -> Self {
        let fsm = Fsm::new(FsmConfig {
            domain: config.domain.clone(),
            max_message_size: config.max_message_size,
            tls_available: config.tls_available(),
            max_recipients: config.max_recipients,
        });

        Self {
            conn: Some(Connection::plain(stream)),
            reader: LineReader::new(),
            fsm,
            config,
            handler,
            shutdown,
        }
    }

    fn conn_mut(&mut self) -> Result<&mut Connection<S>, SessionError> {
        self.conn
            .as_mut()
            .ok_or(SessionError::Connection(ConnectionError::Closed))
    }

    async fn send(&mut self, response: &Response) -> Result<(), SessionError> {
        outgoing!("{response}");
        let bytes = response.to_bytes();
        self.conn_mut()?.write_all(&bytes).await?;
        Ok(())
    }

    /// Reads one line, honouring the shutdown signal, the per-command
    /// timeout, and the whole-session deadline — all suspension points a
    /// session can block on, in one place.
    async fn next_line(
        &mut self,
        max_len: usize,
        session_deadline: Option<Instant>,
    ) -> Result<LineOutcome, SessionError> {
        let command_timeout = deadline_from_secs(self.config.command_timeout_secs);
        // Destructure into disjoint field borrows: `select!` below needs
        // `shutdown` mutably while `conn`/`reader` are borrowed inside the
        // read future, and the borrow checker only allows that split when
        // the fields are named explicitly rather than reached through
        // `self.` inside a captured block.
        let Self {
            conn,
            reader,
            shutdown,
            ..
        } = self;

        let read = async {
            match conn.as_mut() {
                Some(conn) => reader
                    .read_line(conn, max_len)
                    .await
                    .map_err(SessionError::from),
                None => Err(SessionError::Connection(ConnectionError::Closed)),
            }
        };

        let timed = async {
            match command_timeout {
                Some(d) => tokio::time::timeout(d, read)
                    .await
                    .map_err(|_| SessionError::CommandTimeout)?,
                None => read.await,
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.recv() => Err(SessionError::Shutdown),
            () = sleep_until_deadline(session_deadline) => Err(SessionError::ConnectionTimeout),
            result = timed => result,
        }
    }

    /// Runs the session to completion: greeting through QUIT, EOF, a
    /// transport error, or a shutdown signal.
    pub async fn run(mut self) -> Result<(), SessionError> {
        internal!("Connected");

        let greeting = Response::greeting(&self.config.domain);
        self.send(&greeting).await?;

        let session_deadline = deadline_from_secs(self.config.connection_timeout_secs)
            .map(|d| Instant::now() + d);

        let result = self.drive(session_deadline).await;

        match &result {
            Ok(()) => internal!("Connection closed"),
            Err(err) if err.is_shutdown() => {
                internal!(level = INFO, "Session ended: shutdown requested");
            }
            Err(err) => internal!(level = ERROR, "Session ended: {err}"),
        }

        if let Some(conn) = self.conn.as_mut() {
            let _ = conn.close().await;
        }

        result
    }

    async fn drive(&mut self, session_deadline: Option<Instant>) -> Result<(), SessionError> {
        loop {
            let line = match self.next_line(self.config.max_command_length, session_deadline).await {
                Ok(LineOutcome::Line(bytes)) => bytes,
                Ok(LineOutcome::TooLong) => {
                    self.send(&Response::syntax_error("Line too long")).await?;
                    return Ok(());
                }
                Ok(LineOutcome::Eof) => return Ok(()),
                Err(err) => {
                    if err.is_shutdown() {
                        let response = Response::service_unavailable(format!(
                            "{} Service shutting down",
                            self.config.domain
                        ));
                        let _ = self.send(&response).await;
                    } else if err.is_timeout() {
                        // Best effort: the peer is almost certainly gone by
                        // now, so a failed write here is not itself an
                        // error worth reporting.
                        let _ = self.send(&Response::service_unavailable("command timeout")).await;
                    }
                    return Err(err);
                }
            };

            let text = String::from_utf8_lossy(&line);
            incoming!("{text}");
            let command = Command::parse(&text);

            match self.fsm.step(command) {
                Outcome::Accepted(response) => {
                    self.send(&response).await?;
                    if self.fsm.state() == State::Data {
                        self.run_data_phase(session_deadline).await?;
                    }
                }
                Outcome::Rejected(response) => {
                    self.send(&response).await?;
                }
                Outcome::Close(response) => {
                    self.send(&response).await?;
                    return Ok(());
                }
                Outcome::BeginTls(response) => {
                    self.send(&response).await?;
                    self.upgrade_tls().await?;
                }
            }
        }
    }

    async fn run_data_phase(
        &mut self,
        session_deadline: Option<Instant>,
    ) -> Result<(), SessionError> {
        let mut accumulator = DataAccumulator::new(self.config.max_message_size);

        loop {
            match self.next_line(DATA_LINE_CAP, session_deadline).await {
                Ok(LineOutcome::Line(line)) => {
                    if accumulator.push_line(&line) {
                        break;
                    }
                }
                Ok(LineOutcome::TooLong) => {
                    let response = self.fsm.abort_data(DataError::LineTooLong);
                    self.send(&response).await?;
                    return Ok(());
                }
                Ok(LineOutcome::Eof) => return Ok(()),
                Err(err) => return Err(err),
            }
        }

        let body = match accumulator.finish() {
            Ok(body) => body,
            Err(err) => {
                let response = self.fsm.abort_data(err);
                self.send(&response).await?;
                return Ok(());
            }
        };

        let envelope: Envelope = self
            .fsm
            .transaction()
            .cloned()
            .map(Envelope::from)
            .unwrap_or_else(|| Envelope {
                reverse_path: None,
                recipients: Vec::new(),
            });

        let delivery = self.handler.deliver(Message { envelope, body }).await;
        if let Err(err) = &delivery {
            internal!(level = ERROR, "Delivery failed: {err}");
        }

        let (_, response) = self.fsm.complete_data(delivery.is_ok());
        self.send(&response).await
    }

    /// The STARTTLS upgrade sequence: the FSM has already moved to
    /// `State::Initial` and emitted `220`; this discards any bytes the
    /// client sent ahead of the handshake, performs the handshake, and only
    /// then tells the FSM TLS is active.
    ///
    /// On handshake failure there is no cleartext stream left to write a 451
    /// to: `tokio_rustls::TlsAcceptor::accept` takes the transport by value
    /// and drops it along with the failed handshake future, so the error
    /// propagated here finds `self.conn` already `None` by the time `run`
    /// handles it. The session ends the same way an I/O failure does — no
    /// response, the peer observes a closed socket.
    async fn upgrade_tls(&mut self) -> Result<(), SessionError> {
        let Some(tls_material) = self.config.tls.clone() else {
            return Err(SessionError::Connection(ConnectionError::Tls(
                TlsError::Rustls("STARTTLS accepted but no TLS material configured".to_string()),
            )));
        };

        self.reader.clear();

        let conn = self
            .conn
            .take()
            .ok_or(SessionError::Connection(ConnectionError::Closed))?;

        let (upgraded, info) = conn
            .start_tls(&tls_material)
            .await
            .map_err(ConnectionError::from)?;

        self.conn = Some(upgraded);
        self.fsm.confirm_tls();
        internal!(
            "TLS established: {:?}/{}",
            info.protocol_version(),
            info.cipher_suite_name()
        );

        Ok(())
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}
