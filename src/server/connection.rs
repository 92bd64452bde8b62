use std::io::{self, Read};
use std::time::{Duration, Instant};

use crate::handlers::Service;
use crate::http::request::REDIRECT_TARGET;
use crate::http::{Flush, Request, Response, Transport};
use crate::network::{Interest, Readiness};
use crate::storage::FileStore;

/// What the connection wants next; the server turns it into a re-arm or a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Read,
    Write,
    Close,
}

impl Next {
    pub fn interest(self) -> Option<Interest> {
        match self {
            Next::Read => Some(Interest::READ),
            Next::Write => Some(Interest::WRITE),
            Next::Close => None,
        }
    }
}

/// Per-socket state: the read buffer plus the one request/response in flight.
pub struct Connection<S> {
    pub stream: S,
    read_buffer: Vec<u8>,
    request: Request,
    response: Option<Response>,
    last_activity: Instant,
    max_line: usize,
    read_chunk: usize,
}

impl<S: Transport> Connection<S> {
    pub fn new(stream: S, max_line: usize, read_chunk: usize) -> Self {
        Self {
            stream,
            read_buffer: Vec::with_capacity(read_chunk),
            request: Request::new(max_line),
            response: None,
            last_activity: Instant::now(),
            max_line,
            read_chunk,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn buffered(&self) -> &[u8] {
        &self.read_buffer
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn on_event<F: FileStore>(&mut self, event: Readiness, service: &Service<F>) -> Next {
        if self.response.is_some() {
            if event.writable {
                return self.on_writable(service);
            }
        } else if event.readable {
            return self.on_readable(service);
        }

        if event.error {
            return self.on_error();
        }
        // Spurious wake-up: keep waiting for the same thing.
        if self.response.is_some() { Next::Write } else { Next::Read }
    }

    /// Drains the socket into the buffer, parsing after every chunk.
    pub fn on_readable<F: FileStore>(&mut self, service: &Service<F>) -> Next {
        if self.response.is_some() {
            return Next::Write;
        }

        let mut chunk = vec![0u8; self.read_chunk];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    tracing::debug!("peer closed connection");
                    return Next::Close;
                }
                Ok(n) => {
                    self.read_buffer.extend_from_slice(&chunk[..n]);
                    self.last_activity = Instant::now();
                    self.request.advance(&mut self.read_buffer, &service.store);
                    if self.request.is_complete() {
                        return self.start_response(service);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Next::Read,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "read failed");
                    return Next::Close;
                }
            }
        }
    }

    /// Flushes what the socket accepts; re-arms for read once everything is out.
    pub fn on_writable<F: FileStore>(&mut self, service: &Service<F>) -> Next {
        let Some(response) = self.response.as_mut() else {
            return Next::Read;
        };

        match response.flush(&mut self.stream) {
            Ok(Flush::Pending) => {
                self.last_activity = Instant::now();
                Next::Write
            }
            Ok(Flush::Done) => {
                self.last_activity = Instant::now();
                self.finish_response(service)
            }
            Err(e) => {
                tracing::warn!(error = %e, "write failed");
                Next::Close
            }
        }
    }

    pub fn on_error(&mut self) -> Next {
        tracing::debug!("socket error or hang-up");
        Next::Close
    }

    fn start_response<F: FileStore>(&mut self, service: &Service<F>) -> Next {
        let target = self.request.target.as_deref().unwrap_or(REDIRECT_TARGET);
        let response = service.respond(target);
        tracing::info!(
            method = ?self.request.method,
            resource = %self.request.resource,
            kind = ?response.kind,
            "request complete"
        );
        self.response = Some(response);
        Next::Write
    }

    fn finish_response<F: FileStore>(&mut self, service: &Service<F>) -> Next {
        if let Some(done) = self.response.take() {
            tracing::debug!(kind = ?done.kind, bytes = done.sent(), "response sent");
            if let Some(file) = done.into_file() {
                service.store.close(file);
            }
        }
        let skip = self.request.unread_body();
        self.request = Request::after(self.max_line, skip);

        // The client may already have sent its next request.
        if !self.read_buffer.is_empty() {
            self.request.advance(&mut self.read_buffer, &service.store);
            if self.request.is_complete() {
                return self.start_response(service);
            }
        }
        Next::Read
    }
}
