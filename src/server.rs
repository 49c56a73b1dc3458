use std::future::Future;
use std::io::{self, BufReader};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use pki_types::{CertificateDer, PrivateKeyDer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustls_pemfile::{certs, private_key};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_rustls::TlsAcceptor;
use uuid::Uuid;

use crate::config::{Config, Transport};
use crate::error::Error;
use crate::handler::Handler;
use crate::lock::LockFile;
use crate::request::Request;
use crate::session::ClientSession;
use crate::stream::SocketFlowStream;

/// How often the main loop revisits its own housekeeping (lock-file
/// heartbeat). Per-session ping/timeout cadence lives on the session's own
/// driving future instead — see `drive_session` — so this is the only
/// timer the coordinator itself owns.
const INTERVAL_LOCK_SIGNAL: Duration = Duration::from_millis(10_000);
/// How often a request- or data-phase future wakes up to re-check its
/// session's deadlines against the clock, independent of whether new bytes
/// have arrived.
const SESSION_TICK: Duration = Duration::from_millis(500);

/// The single-coordinator websocket server (spec §4.E). One task drives
/// everything: accepting connections, reading frames, and housekeeping —
/// no session is ever touched by two futures at once, because at any
/// instant a session is owned either by the coordinator's `FuturesUnordered`
/// set or by nothing else.
pub struct Server<H: Handler + 'static> {
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    handler: Arc<H>,
    lock: Option<LockFile>,
    online: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
}

/// A cloneable handle that lets the host ask a running server to stop, or
/// read the live `online` count from outside the coordinator task (spec §3
/// `online`; testable property P5).
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<Notify>,
    online: Arc<AtomicUsize>,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Sessions with `requestAccepted == true` that have not yet
    /// disconnected.
    pub fn online(&self) -> usize {
        self.online.load(Ordering::SeqCst)
    }
}

enum SessionOutcome {
    AcceptFailed(Error),
    Requested(ClientSession, Result<Request, Error>),
    Streamed(ClientSession),
}

type SessionFuture = Pin<Box<dyn Future<Output = SessionOutcome> + Send>>;

impl<H: Handler + 'static> Server<H> {
    /// Binds the listener (and, if configured, loads the TLS certificate
    /// chain and key) without starting the event loop.
    pub async fn bind(config: Config, handler: H) -> Result<Self, Error> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr())
            .await
            .map_err(|e| Error::Bind(config.bind_addr(), e))?;

        let tls_acceptor = if config.enable_ssl || config.transport == Transport::Tls {
            let paths = config.ssl_cert_path.as_ref().ok_or(Error::MissingCertificate)?;
            let certs = load_certs(&paths.crt)?;
            let key = load_key(&paths.key)?;
            let rustls_config = rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(|e| Error::Tls { source: e })?;
            Some(TlsAcceptor::from(Arc::new(rustls_config)))
        } else {
            None
        };

        let lock = if !config.lock_file.as_os_str().is_empty() {
            let lock = LockFile::new(config.lock_file.clone());
            lock.lock()?;
            Some(lock)
        } else {
            None
        };

        Ok(Server {
            listener,
            tls_acceptor,
            handler: Arc::new(handler),
            lock,
            online: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// A minimal entry point with no TLS and no single-instance lock —
    /// the equivalent of `socket-flow`'s own `start_server(port)`, useful
    /// for embedding or for tests that just want a loopback listener.
    pub async fn bind_plain(addr: impl AsRef<str>, handler: H) -> Result<Self, Error> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr).await.map_err(|e| Error::Bind(addr.to_string(), e))?;
        Ok(Server {
            listener,
            tls_acceptor: None,
            handler: Arc::new(handler),
            lock: None,
            online: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle { shutdown: self.shutdown.clone(), online: self.online.clone() }
    }

    pub fn online(&self) -> usize {
        self.online.load(Ordering::SeqCst)
    }

    /// Runs the event loop until `ServerHandle::stop` is called.
    pub async fn run(mut self) -> Result<(), Error> {
        self.handler.on_server_start().await;

        let mut tasks: FuturesUnordered<SessionFuture> = FuturesUnordered::new();
        let mut lock_signal = tokio::time::interval(INTERVAL_LOCK_SIGNAL);
        lock_signal.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let acceptor = self.tls_acceptor.clone();
                            let id = generate_session_id();
                            tasks.push(Box::pin(async move {
                                let socket = match acceptor {
                                    Some(acceptor) => match acceptor.accept(stream).await {
                                        Ok(tls) => SocketFlowStream::Tls(Box::new(tls)),
                                        Err(e) => return SessionOutcome::AcceptFailed(Error::Io { source: e }),
                                    },
                                    None => SocketFlowStream::Plain(stream),
                                };
                                // spec §3: the peer IP alone, IPv6 stripped
                                // of its bracket notation — not the full
                                // `host:port` socket address.
                                let session = ClientSession::new(id, socket, peer.ip().to_string());
                                let (session, result) = drive_request(session).await;
                                SessionOutcome::Requested(session, result)
                            }));
                        }
                        Err(e) => self.handler.on_server_error(&e.to_string()).await,
                    }
                }

                Some(outcome) = tasks.next(), if !tasks.is_empty() => {
                    match outcome {
                        SessionOutcome::AcceptFailed(e) => {
                            self.handler.on_socket_error(0, &e.to_string()).await;
                        }
                        SessionOutcome::Requested(mut session, Ok(request)) => {
                            if self.handler.on_client_connect(&mut session, &request).await {
                                session.accept_request();
                                // spec §3: incremented exactly once per
                                // accepted connection, i.e. at acceptance,
                                // not at handshake completion — so a
                                // handshake-write failure below still has
                                // to unwind it before disconnecting.
                                self.online.fetch_add(1, Ordering::SeqCst);
                                let sec_key = request.header("sec-websocket-key").unwrap_or_default().to_string();
                                match session.perform_handshake(&sec_key).await {
                                    Ok(()) => {
                                        let handler = self.handler.clone();
                                        tasks.push(Box::pin(async move {
                                            SessionOutcome::Streamed(drive_session(session, handler).await)
                                        }));
                                    }
                                    Err(e) => {
                                        self.online.fetch_sub(1, Ordering::SeqCst);
                                        self.handler.on_socket_error(0, &e.to_string()).await;
                                        session.disconnect().await;
                                        self.handler.on_client_disconnect(session.id).await;
                                    }
                                }
                            } else {
                                // The request was never accepted, so no
                                // `clientDisconnect` fires here (spec
                                // scenario 3: a rejected origin closes
                                // silently from the host's perspective).
                                let _ = session.error(400, "Bad Request").await;
                                session.disconnect().await;
                            }
                        }
                        SessionOutcome::Requested(mut session, Err(e)) => {
                            // Same reasoning: the request was malformed
                            // and never reached `acceptRequest`.
                            self.handler.on_socket_error(0, &e.to_string()).await;
                            let _ = session.error(400, "Bad Request").await;
                            session.disconnect().await;
                        }
                        SessionOutcome::Streamed(session) => {
                            self.online.fetch_sub(1, Ordering::SeqCst);
                            self.handler.on_client_disconnect(session.id).await;
                        }
                    }
                }

                _ = lock_signal.tick() => {
                    if let Some(lock) = &self.lock {
                        if let Err(e) = lock.heartbeat() {
                            self.handler.on_server_error(&e.to_string()).await;
                        }
                    }
                }

                _ = self.shutdown.notified() => break,
            }
        }

        self.handler.on_server_stop().await;
        Ok(())
    }
}

/// Drives one session through `RequestPending`, re-polling on a fixed tick
/// so a slow client that never completes its request gets cut off by
/// `TIMEOUT_HANDSHAKE` instead of parking its future forever.
async fn drive_request(mut session: ClientSession) -> (ClientSession, Result<Request, Error>) {
    loop {
        tokio::select! {
            result = session.receive_request() => {
                match result {
                    Ok(Some(request)) => return (session, Ok(request)),
                    Ok(None) => continue,
                    Err(e) => return (session, Err(e)),
                }
            }
            _ = tokio::time::sleep(SESSION_TICK) => {
                if session.timed_out(Instant::now()) {
                    return (session, Err(Error::HandshakeTimeout));
                }
            }
        }
    }
}

/// Drives one session for the rest of its life post-handshake: reads
/// frames, hands completed messages to the host, and on every tick checks
/// whether it is due for a liveness ping or has blown past a deadline.
async fn drive_session(mut session: ClientSession, handler: Arc<dyn Handler>) -> ClientSession {
    loop {
        tokio::select! {
            payload = session.receive_data() => {
                if !session.connected {
                    break;
                }
                if let Some(payload) = payload {
                    if !handler.on_data_receive(&mut session, payload).await {
                        session.disconnect().await;
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(SESSION_TICK) => {
                let now = Instant::now();
                if session.timed_out(now) {
                    session.disconnect().await;
                    break;
                }
                if session.ping_due(now) {
                    let _ = session.ping().await;
                }
            }
        }
        if !session.connected {
            break;
        }
    }
    session
}

fn generate_session_id() -> Uuid {
    let mut rng = StdRng::from_rng(rand::thread_rng());
    Uuid::new_v8(rng.random())
}

fn load_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = std::fs::File::open(path)?;
    certs(&mut BufReader::new(file)).collect::<io::Result<Vec<_>>>().map_err(Error::from)
}

fn load_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>, Error> {
    let file = std::fs::File::open(path)?;
    private_key(&mut BufReader::new(file))?.ok_or(Error::MissingCertificate)
}
