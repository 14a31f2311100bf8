//! C6: the listener/acceptor. Binds a socket, spawns one [`Session`] task per
//! accepted connection, and drives graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::join_all;
use prixfixe_common::error::ServerError;
use prixfixe_common::signal::{self, Signal};
use prixfixe_common::ServerConfig;
use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinHandle;

use prixfixe_common::internal;
use prixfixe_proto::Response;

use crate::connection::Connection;
use crate::handler::MessageHandler;
use crate::session::Session;

/// Binds `config.bind_address:port`. IPv6 unspecified addresses are bound
/// with `IPV6_V6ONLY` disabled so a single listener accepts both IPv4 and
/// IPv6 clients; `tokio::net::TcpListener::bind` doesn't expose that socket
/// option, so the socket is built with `socket2` and handed off afterwards.
fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let address = SocketAddr::new(config.bind_address, config.port);
    let to_server_error = |source: std::io::Error| ServerError::BindFailed {
        address: address.to_string(),
        source,
    };

    let domain = if address.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, None).map_err(to_server_error)?;
    if address.is_ipv6() {
        socket.set_only_v6(false).map_err(to_server_error)?;
    }
    socket.set_reuse_address(true).map_err(to_server_error)?;
    socket.set_nonblocking(true).map_err(to_server_error)?;
    socket.bind(&address.into()).map_err(to_server_error)?;
    socket.listen(1024).map_err(to_server_error)?;

    TcpListener::from_std(socket.into()).map_err(to_server_error)
}

enum Running {
    Stopped,
    Started {
        shutdown_tx: broadcast::Sender<Signal>,
        accept_loop: JoinHandle<()>,
    },
}

/// An embeddable SMTP receive server. Idempotent `start`/`stop`: calling
/// `start` twice without an intervening `stop` errors rather than spawning a
/// second acceptor, and `stop` on a server that was never started errors the
/// same way.
pub struct Server<H: MessageHandler + 'static> {
    config: Arc<ServerConfig>,
    handler: Arc<H>,
    running: Mutex<Running>,
}

impl<H: MessageHandler + 'static> Server<H> {
    #[must_use]
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            running: Mutex::new(Running::Stopped),
        }
    }

    /// Binds the listener and spawns the accept loop. Returns once the
    /// socket is bound; the accept loop itself runs in the background until
    /// [`Server::stop`] is called.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if matches!(*running, Running::Started { .. }) {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = bind(&self.config)?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::BindFailed {
            address: format!("{}:{}", self.config.bind_address, self.config.port),
            source,
        })?;
        internal!("Listening on {local_addr}");

        let (shutdown_tx, shutdown_rx) = signal::channel();
        let accept_loop = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.config),
            Arc::clone(&self.handler),
            shutdown_rx,
        ));

        *running = Running::Started {
            shutdown_tx,
            accept_loop,
        };
        Ok(local_addr)
    }

    /// Broadcasts the shutdown signal, waits up to
    /// `shutdown_grace_period_secs` for in-flight sessions to finish on
    /// their own, then returns once the accept loop has wound down
    /// regardless. Idempotent: a second call on an already-stopped server
    /// errors without side effects.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut running = self.running.lock().await;
        let Running::Started {
            shutdown_tx,
            accept_loop,
        } = std::mem::replace(&mut *running, Running::Stopped)
        else {
            return Err(ServerError::NotRunning);
        };

        let _ = shutdown_tx.send(Signal::Shutdown);

        let grace = self.config.shutdown_grace_period_secs;
        if grace == 0 {
            let _ = accept_loop.await;
        } else {
            let deadline = std::time::Duration::from_secs(grace);
            if tokio::time::timeout(deadline, accept_loop).await.is_err() {
                internal!(level = WARN, "Shutdown grace period elapsed with sessions still running");
            }
        }

        Ok(())
    }
}

async fn accept_loop<H: MessageHandler + 'static>(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    handler: Arc<H>,
    mut shutdown_rx: broadcast::Receiver<Signal>,
) {
    let semaphore = Arc::new(Semaphore::new(config.max_connections));
    let sessions = Arc::new(Mutex::new(Vec::new()));

    loop {
        tokio::select! {
            biased;

            signal = shutdown_rx.recv() => {
                if matches!(signal, Ok(Signal::Shutdown) | Err(_)) {
                    break;
                }
            }

            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else {
                    continue;
                };

                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    internal!(level = WARN, "Connection from {peer} rejected: at capacity");
                    tokio::spawn(reject_at_capacity(stream, Arc::clone(&config)));
                    continue;
                };

                internal!("Accepted connection from {peer}");

                let config = Arc::clone(&config);
                let handler = Arc::clone(&handler);
                let session_shutdown = shutdown_rx.resubscribe();
                let sessions = Arc::clone(&sessions);

                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    let session = Session::new(stream, config, handler, session_shutdown);
                    if let Err(err) = session.run().await {
                        if !err.is_shutdown() {
                            internal!(level = ERROR, "Session with {peer} ended: {err}");
                        }
                    }
                });

                sessions.lock().await.push(handle);
            }
        }
    }

    let handles = std::mem::take(&mut *sessions.lock().await);
    join_all(handles).await;
}

/// Reference policy for a connection accepted while at `max_connections`:
/// accept it so the client gets a diagnostic rather than an unexplained
/// reset, write 421, then close. No session, no FSM, no handler dispatch.
async fn reject_at_capacity(stream: tokio::net::TcpStream, config: Arc<ServerConfig>) {
    let mut conn = Connection::plain(stream);
    let response = Response::service_unavailable(format!(
        "{} Service not available, too many connections",
        config.domain
    ));
    let _ = conn.write_all(&response.to_bytes()).await;
    let _ = conn.close().await;
}
