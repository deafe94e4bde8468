use std::io::{ErrorKind, Read, Write};
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::protocol::{ProtocolError, RequestBuffer, Response, READ_CHUNK_SIZE};
use crate::store::DataStore;
use crate::thread_pool::ThreadPool;
use crate::Result;

/// Port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 8888;

/// How long a partially received request may wait for the rest of its bytes.
pub const PARTIAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a connection being dropped keeps discarding client bytes.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Behaviour switches for a server.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    /// Demand `username`/`password` on every privileged request.
    pub require_auth: bool,
}

/// The gradebook server.
///
/// Generic over both the store `S` and the thread pool `P`. Every accepted
/// connection gets its own clone of the store and runs on the pool with
/// no supervision; nothing is shared between connections except the
/// store's own internals.
pub struct GradebookServer<S: DataStore, P: ThreadPool> {
    store: S,
    pool: P,
    listener: TcpListener,
    options: ServerOptions,
    stop: Arc<AtomicBool>,
}

/// Stops a running server from another thread or a signal handler.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl ShutdownHandle {
    /// Sets the stop flag and wakes the accept loop.
    ///
    /// Handlers already running are left alone; they end when their
    /// clients disconnect.
    pub fn shutdown(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut addr = self.addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        // A throwaway connection unblocks `accept` so the flag is seen.
        if let Err(e) = TcpStream::connect_timeout(&addr, Duration::from_secs(1)) {
            debug!("Wake-up connection to {} failed: {}", addr, e);
        }
    }

    /// Returns true once shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl<S: DataStore, P: ThreadPool> GradebookServer<S, P> {
    /// Binds a listener on `addr`.
    pub fn bind(store: S, pool: P, addr: impl ToSocketAddrs, options: ServerOptions) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            store,
            pool,
            listener,
            options,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The address actually bound, useful after binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle that stops this server.
    pub fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        Ok(ShutdownHandle {
            stop: Arc::clone(&self.stop),
            addr: self.local_addr()?,
        })
    }

    /// Runs the accept loop until shutdown is requested.
    pub fn run(self) -> Result<()> {
        info!("Listening on {}", self.local_addr()?);

        while !self.stop.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.stop.load(Ordering::SeqCst) {
                        debug!("Dropping connection from {} during shutdown", peer);
                        break;
                    }
                    let dispatcher = Dispatcher::new(self.store.clone(), self.options.require_auth);
                    let connection = Connection::new(stream, peer, dispatcher);
                    if let Err(e) = self.pool.spawn(move || connection.serve()) {
                        error!("Failed to start handler for {}: {}", peer, e);
                    }
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }

        info!("Stopped accepting connections");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Accepted,
    Serving,
    Closed,
}

/// One client connection, from accept to close.
///
/// Owns the socket and the connection's dispatcher (and through it the
/// store handle); both are released when `serve` returns.
struct Connection<S: DataStore> {
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher<S>,
    buffer: RequestBuffer,
    state: ConnectionState,
}

impl<S: DataStore> Connection<S> {
    fn new(stream: TcpStream, peer: SocketAddr, dispatcher: Dispatcher<S>) -> Self {
        Connection {
            stream,
            peer,
            dispatcher,
            buffer: RequestBuffer::new(),
            state: ConnectionState::Accepted,
        }
    }

    fn serve(mut self) {
        debug!("Accepted connection from {}", self.peer);
        self.transition(ConnectionState::Serving);
        if let Err(e) = self.serve_requests() {
            error!("Error handling connection from {}: {}", self.peer, e);
        }
        self.transition(ConnectionState::Closed);
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("{}: {:?} -> {:?}", self.peer, self.state, next);
        self.state = next;
    }

    /// Reads, dispatches and answers until the client goes away.
    fn serve_requests(&mut self) -> Result<()> {
        let peer = self.peer.to_string();
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            let pending = self.buffer.is_pending();
            self.stream
                .set_read_timeout(pending.then_some(PARTIAL_REQUEST_TIMEOUT))?;

            let n = match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e)
                    if pending
                        && matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    warn!("{}: discarding incomplete request", peer);
                    self.buffer.clear();
                    let response = self.dispatcher.dispatch(Err(ProtocolError::Incomplete), &peer);
                    self.respond(&response)?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            self.buffer.extend(&chunk[..n]);
            while let Some(frame) = self.buffer.next_frame() {
                let unrecoverable = matches!(frame, Err(ProtocolError::TooLarge(_)));
                let response = self.dispatcher.dispatch(frame, &peer);
                self.respond(&response)?;
                if unrecoverable {
                    warn!("{}: oversized request, closing connection", peer);
                    return self.drain_and_close();
                }
            }
        }
    }

    /// Half-closes the socket and discards client bytes for up to
    /// [`DRAIN_TIMEOUT`]. Unread bytes at close turn into a reset, which
    /// can drop the last response before the client reads it.
    fn drain_and_close(&mut self) -> Result<()> {
        self.stream.shutdown(Shutdown::Write)?;
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            self.stream.set_read_timeout(Some(remaining))?;
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!("{}: drain ended: {}", self.peer, e);
                    return Ok(());
                }
            }
        }
    }

    fn respond(&mut self, response: &Response) -> Result<()> {
        self.stream.write_all(&response.encode()?)?;
        self.stream.flush()?;
        Ok(())
    }
}
