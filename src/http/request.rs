use std::collections::HashMap;

use crate::http::multipart::{Progress, Upload, UploadState};
use crate::http::{next_line, Line};
use crate::storage::FileStore;

/// Target handed to the response builder for anything that ends in a redirect.
pub const REDIRECT_TARGET: &str = "/redirect";

/// Header lines accepted per request before it is treated as malformed.
pub const MAX_HEADER_LINES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl Method {
    pub fn from_token(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParseState {
    AwaitingLine,
    AwaitingHeaders,
    AwaitingBody,
    Complete,
}

/// One in-flight request, filled in as bytes arrive.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub resource: String,
    pub version: String,
    /// Keyed by lowercased name; holds the name as sent and its value.
    pub headers: HashMap<String, (String, String)>,
    pub parse_state: ParseState,
    pub upload: Upload,
    /// Set once the request is complete.
    pub target: Option<String>,
    content_length: usize,
    body_consumed: usize,
    header_lines: usize,
    skip: usize,
    max_line: usize,
}

impl Request {
    pub fn new(max_line: usize) -> Self {
        Self::after(max_line, 0)
    }

    /// A request that first drops `skip` bytes of the previous request's unread body.
    pub fn after(max_line: usize, skip: usize) -> Self {
        Self {
            method: Method::Other(String::new()),
            resource: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            parse_state: ParseState::AwaitingLine,
            upload: Upload::default(),
            target: None,
            content_length: 0,
            body_consumed: 0,
            header_lines: 0,
            skip,
            max_line,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.parse_state == ParseState::Complete
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Declared body bytes this request completed without consuming.
    pub fn unread_body(&self) -> usize {
        self.content_length.saturating_sub(self.body_consumed)
    }

    pub fn upload_state(&self) -> UploadState {
        self.upload.state
    }

    pub fn upload_file_name(&self) -> Option<&str> {
        self.upload.file_name.as_deref()
    }

    /// Consumes as much of `buf` as the current state allows.
    ///
    /// Returns when the request is complete or the buffer runs dry; unparsed
    /// bytes stay in `buf` for the next call.
    pub fn advance<F: FileStore>(&mut self, buf: &mut Vec<u8>, store: &F) {
        loop {
            match self.parse_state {
                ParseState::AwaitingLine if self.skip > 0 => {
                    let n = self.skip.min(buf.len());
                    buf.drain(..n);
                    self.skip -= n;
                    if self.skip > 0 {
                        return;
                    }
                }
                ParseState::AwaitingLine => match next_line(buf, self.max_line) {
                    Line::Pending => return,
                    Line::TooLong => {
                        buf.clear();
                        self.malformed("request line too long");
                    }
                    // Stray CRLF between requests.
                    Line::Ready(line) if line.is_empty() => {}
                    Line::Ready(line) => self.parse_request_line(&line),
                },
                ParseState::AwaitingHeaders => match next_line(buf, self.max_line) {
                    Line::Pending => return,
                    Line::TooLong => {
                        buf.clear();
                        self.malformed("header line too long");
                    }
                    Line::Ready(line) if line.is_empty() => self.finish_headers(),
                    Line::Ready(_) if self.header_lines >= MAX_HEADER_LINES => {
                        buf.clear();
                        self.malformed("too many header lines");
                    }
                    Line::Ready(line) => self.parse_header(&line),
                },
                ParseState::AwaitingBody => {
                    self.parse_body(buf, store);
                    if self.parse_state != ParseState::Complete {
                        return;
                    }
                }
                ParseState::Complete => return,
            }
        }
    }

    fn parse_request_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let mut parts = line.split_whitespace();

        match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(resource), Some(version)) => {
                self.method = Method::from_token(method);
                self.resource = resource.to_string();
                self.version = version.to_string();
                self.parse_state = ParseState::AwaitingHeaders;
                tracing::debug!(method, resource, version, "parsed request line");
            }
            _ => self.malformed("unparsable request line"),
        }
    }

    fn parse_header(&mut self, line: &[u8]) {
        self.header_lines += 1;
        let line = String::from_utf8_lossy(line);
        if let Some((key, value)) = line.split_once(": ") {
            self.headers
                .insert(key.to_ascii_lowercase(), (key.to_string(), value.to_string()));
        }
    }

    fn finish_headers(&mut self) {
        self.parse_state = ParseState::AwaitingBody;

        let content_type = self.header("Content-Type").map(str::to_string);
        if let Some(content_type) = content_type {
            if content_type.contains("multipart/form-data") {
                self.upload = Upload::begin(&content_type);
            }
        }

        self.content_length = self
            .header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
    }

    fn parse_body<F: FileStore>(&mut self, buf: &mut Vec<u8>, store: &F) {
        match self.method {
            Method::Get => {
                self.target = Some(self.resource.clone());
                self.parse_state = ParseState::Complete;
            }
            Method::Post if self.upload.state != UploadState::None => {
                let before = buf.len();
                let progress = self.upload.advance(buf, store, self.max_line);
                self.body_consumed += before - buf.len();

                match progress {
                    Progress::Pending => {}
                    Progress::Done => self.complete_with_redirect(),
                    Progress::Malformed(reason) => self.malformed(reason),
                }
            }
            // No upload to receive; the unread body is skipped by the next request.
            _ => self.complete_with_redirect(),
        }
    }

    fn complete_with_redirect(&mut self) {
        self.target = Some(REDIRECT_TARGET.to_string());
        self.parse_state = ParseState::Complete;
    }

    fn malformed(&mut self, reason: &'static str) {
        tracing::warn!(reason, resource = %self.resource, "malformed request, redirecting");
        self.complete_with_redirect();
    }
}
