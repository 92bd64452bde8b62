use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;

const HTTP_VERSION: &str = "HTTP/1.1";
const FALLBACK_CHUNK: usize = 64 * 1024;

/// What a completed request's target resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Listing,
    Download(String),
    Delete(String),
    Redirect,
}

impl Route {
    /// Resolves by the first path segment; the rest is the (percent-decoded) file name.
    pub fn resolve(target: &str) -> Self {
        let path = target.split_once('?').map_or(target, |(p, _)| p);
        if path == "/" {
            return Route::Listing;
        }

        let Some(rest) = path.strip_prefix('/') else {
            return Route::Redirect;
        };
        let Some((op, name)) = rest.split_once('/') else {
            return Route::Redirect;
        };
        if name.is_empty() {
            return Route::Redirect;
        }
        let name = match urlencoding::decode(name) {
            Ok(n) => n.into_owned(),
            Err(_) => return Route::Redirect,
        };

        match op {
            "download" => Route::Download(name),
            "delete" => Route::Delete(name),
            _ => Route::Redirect,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    FileListing,
    FileDownload,
    Redirect,
    Error,
}

#[derive(Debug)]
pub enum Body {
    InMemory(Vec<u8>),
    FileBacked { file: File, len: u64 },
    Empty,
}

impl Body {
    fn len(&self) -> u64 {
        match self {
            Body::InMemory(bytes) => bytes.len() as u64,
            Body::FileBacked { len, .. } => *len,
            Body::Empty => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    Done,
    Pending,
}

/// A socket the response can be flushed into.
pub trait Transport: Read + Write {
    /// Sends up to `count` bytes of `file` starting at `offset`.
    fn send_file(&mut self, file: &File, offset: u64, count: usize) -> io::Result<usize> {
        let mut chunk = vec![0u8; count.min(FALLBACK_CHUNK)];
        let n = file.read_at(&mut chunk, offset)?;
        if n == 0 {
            return Ok(0);
        }
        self.write(&chunk[..n])
    }
}

impl Transport for mio::net::TcpStream {
    fn send_file(&mut self, file: &File, offset: u64, count: usize) -> io::Result<usize> {
        let mut off = offset as libc::off_t;
        let res = unsafe { libc::sendfile(self.as_raw_fd(), file.as_raw_fd(), &mut off, count) };
        if res < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res as usize)
        }
    }
}

/// A fully headed response. The head is built once; only `sent` moves.
#[derive(Debug)]
pub struct Response {
    pub kind: ResponseKind,
    head: Vec<u8>,
    body: Body,
    sent: u64,
}

impl Response {
    pub fn listing(html: Vec<u8>) -> Self {
        let head = build_head(
            200,
            "OK",
            html.len() as u64,
            Some("text/html;charset=UTF-8"),
            None,
            None,
        );
        Self::new(ResponseKind::FileListing, head, Body::InMemory(html))
    }

    pub fn download(file: File, len: u64) -> Self {
        let range = len.checked_sub(1);
        let head = build_head(200, "OK", len, Some("application/octet-stream"), None, range);
        Self::new(ResponseKind::FileDownload, head, Body::FileBacked { file, len })
    }

    pub fn redirect(location: &str) -> Self {
        let head = build_head(
            302,
            "Moved Temporarily",
            0,
            Some("text/html;charset=UTF-8"),
            Some(location),
            None,
        );
        Self::new(ResponseKind::Redirect, head, Body::Empty)
    }

    pub fn error(status: u16, reason: &str) -> Self {
        let html = format!(
            "<html><head><title>{status} {reason}</title></head><body><h1>{status} {reason}</h1></body></html>"
        )
        .into_bytes();
        let head = build_head(
            status,
            reason,
            html.len() as u64,
            Some("text/html;charset=UTF-8"),
            None,
            None,
        );
        Self::new(ResponseKind::Error, head, Body::InMemory(html))
    }

    fn new(kind: ResponseKind, head: Vec<u8>, body: Body) -> Self {
        Self { kind, head, body, sent: 0 }
    }

    pub fn head(&self) -> &[u8] {
        &self.head
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn total_len(&self) -> u64 {
        self.head.len() as u64 + self.body.len()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn is_done(&self) -> bool {
        self.sent >= self.total_len()
    }

    /// Hands back the download file, if any, so it can be closed by its store.
    pub fn into_file(self) -> Option<File> {
        match self.body {
            Body::FileBacked { file, .. } => Some(file),
            _ => None,
        }
    }

    /// Writes as much as `out` accepts, head first, then body.
    pub fn flush<T: Transport>(&mut self, out: &mut T) -> io::Result<Flush> {
        let head_len = self.head.len() as u64;

        while !self.is_done() {
            let result = if self.sent < head_len {
                out.write(&self.head[self.sent as usize..])
            } else {
                let offset = self.sent - head_len;
                match &self.body {
                    Body::InMemory(bytes) => out.write(&bytes[offset as usize..]),
                    Body::FileBacked { file, len } => {
                        let remaining = (len - offset).min(usize::MAX as u64) as usize;
                        out.send_file(file, offset, remaining)
                    }
                    Body::Empty => Ok(0),
                }
            };

            match result {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection accepted no bytes",
                    ));
                }
                Ok(n) => self.sent += n as u64,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Pending),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(Flush::Done)
    }
}

fn build_head(
    status: u16,
    reason: &str,
    content_length: u64,
    content_type: Option<&str>,
    location: Option<&str>,
    range_end: Option<u64>,
) -> Vec<u8> {
    let mut head = format!("{} {} {}\r\n", HTTP_VERSION, status, reason);
    head.push_str(&format!("Content-Length: {}\r\n", content_length));
    if let Some(content_type) = content_type {
        head.push_str(&format!("Content-Type: {}\r\n", content_type));
    }
    if let Some(location) = location {
        head.push_str(&format!("Location: {}\r\n", location));
    }
    if let Some(end) = range_end {
        head.push_str(&format!("Content-Range: 0-{}\r\n", end));
    }
    head.push_str("Connection: keep-alive\r\n\r\n");
    head.into_bytes()
}
