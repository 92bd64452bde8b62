pub mod connection;

use crate::config::Config;
use crate::handlers::Service;
use crate::network::{Interest, Poller, Readiness};
use crate::server::connection::{Connection, Next};
use crate::storage::FileStore;

use mio::net::{TcpListener, TcpStream};
use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address {addr}: {source}")]
    Address {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("reactor failure: {0}")]
    Reactor(#[from] io::Error),
}

/// What the reactor dispatches a descriptor's events to.
enum Handler {
    Listener(TcpListener),
    Connection(Connection<TcpStream>),
}

pub struct Server<F> {
    poller: Poller,
    handlers: HashMap<RawFd, Handler>,
    service: Service<F>,
    listener_fd: RawFd,
    max_line: usize,
    read_chunk: usize,
    timeout: Duration,
}

impl<F: FileStore> Server<F> {
    pub fn bind(config: &Config, service: Service<F>) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .listen_addr()
            .parse()
            .map_err(|source| ServerError::Address {
                addr: config.listen_addr(),
                source,
            })?;

        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let listener_fd = listener.as_raw_fd();

        let mut poller = Poller::new(config.max_events)?;
        // Level-triggered: one accept per event, the rest show up next round.
        poller.register(listener_fd, Interest::READ, false)?;

        let mut handlers = HashMap::new();
        handlers.insert(listener_fd, Handler::Listener(listener));

        tracing::info!(%addr, "listening");

        Ok(Self {
            poller,
            handlers,
            service,
            listener_fd,
            max_line: config.max_line_bytes,
            read_chunk: config.read_chunk_size,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self.handlers.get(&self.listener_fd) {
            Some(Handler::Listener(listener)) => listener.local_addr(),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "listener is gone")),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.handlers
            .values()
            .filter(|h| matches!(h, Handler::Connection(_)))
            .count()
    }

    /// Descriptors of the open client connections.
    pub fn connection_fds(&self) -> Vec<RawFd> {
        self.handlers
            .iter()
            .filter_map(|(&fd, h)| matches!(h, Handler::Connection(_)).then_some(fd))
            .collect()
    }

    /// Runs the event loop. Only a failing `epoll_wait` ends it.
    pub fn run(&mut self) -> Result<(), ServerError> {
        tracing::info!("event loop started");
        loop {
            self.poll_once(Some(POLL_TIMEOUT))?;
        }
    }

    /// One reactor round: wait, dispatch every event, sweep idle connections.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize, ServerError> {
        let events = self.poller.poll(timeout)?;
        for event in &events {
            self.dispatch(*event);
        }
        self.check_timeouts();
        Ok(events.len())
    }

    fn dispatch(&mut self, event: Readiness) {
        let fd = event.fd;
        let next = match self.handlers.get_mut(&fd) {
            Some(Handler::Listener(listener)) => {
                if let Some(stream) = accept_one(listener) {
                    self.prepare(stream);
                }
                return;
            }
            Some(Handler::Connection(conn)) => conn.on_event(event, &self.service),
            None => {
                tracing::debug!(fd, "event for unknown descriptor");
                return;
            }
        };

        match next.interest() {
            Some(interest) => self.rearm(fd, interest),
            None => self.teardown(fd),
        }
    }

    fn rearm(&mut self, fd: RawFd, interest: Interest) {
        if let Err(e) = self.poller.modify(fd, interest) {
            tracing::warn!(fd, error = %e, "failed to re-arm connection");
            self.teardown(fd);
        }
    }

    /// Registers a freshly accepted stream for one-shot read interest.
    fn prepare(&mut self, stream: TcpStream) {
        // mio accepts with SOCK_NONBLOCK, so the stream is already non-blocking.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "could not set TCP_NODELAY");
        }

        let fd = stream.as_raw_fd();
        if let Err(e) = self.poller.register(fd, Interest::READ, true) {
            tracing::warn!(fd, error = %e, "failed to register connection");
            return;
        }

        self.handlers.insert(
            fd,
            Handler::Connection(Connection::new(stream, self.max_line, self.read_chunk)),
        );
        tracing::info!(fd, "new connection");
    }

    /// Deregisters, shuts down and drops the connection. A second call is a no-op.
    pub fn teardown(&mut self, fd: RawFd) {
        if fd == self.listener_fd {
            return;
        }
        let Some(handler) = self.handlers.remove(&fd) else {
            return;
        };

        if let Err(e) = self.poller.deregister(fd) {
            tracing::debug!(fd, error = %e, "deregister failed");
        }
        if let Handler::Connection(conn) = handler {
            let _ = conn.stream.shutdown(Shutdown::Both);
        }
        tracing::info!(fd, "closed connection");
    }

    fn check_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<RawFd> = self
            .handlers
            .iter()
            .filter_map(|(&fd, handler)| match handler {
                Handler::Connection(conn) if conn.idle_for(now) > self.timeout => Some(fd),
                _ => None,
            })
            .collect();

        for fd in expired {
            tracing::info!(fd, "connection timed out");
            self.teardown(fd);
        }
    }
}

/// One non-blocking accept. No pending connection is not an error.
fn accept_one(listener: &TcpListener) -> Option<TcpStream> {
    match listener.accept() {
        Ok((stream, peer)) => {
            tracing::debug!(%peer, "accepted");
            Some(stream)
        }
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => None,
        Err(e) => {
            tracing::warn!(error = %e, "accept failed");
            None
        }
    }
}
