//! Resumable `multipart/form-data` receiver.
//!
//! Handles a single file part: opening delimiter, part headers, then content
//! streamed into the [`FileStore`] until the closing delimiter shows up.

use crate::http::{find_bytes, next_line, Line};
use crate::storage::FileStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UploadState {
    None,
    AwaitingBoundaryStart,
    AwaitingFilePartHeaders,
    ReceivingFileContent,
    FileComplete,
}

/// Outcome of one [`Upload::advance`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Needs more bytes.
    Pending,
    /// Closing delimiter consumed.
    Done,
    /// The body does not follow the multipart framing.
    Malformed(&'static str),
}

#[derive(Debug)]
pub struct Upload {
    pub state: UploadState,
    pub boundary: Option<String>,
    pub file_name: Option<String>,
    pub bytes_written: u64,
    created: bool,
    write_failed: bool,
}

impl Default for Upload {
    fn default() -> Self {
        Self {
            state: UploadState::None,
            boundary: None,
            file_name: None,
            bytes_written: 0,
            created: false,
            write_failed: false,
        }
    }
}

/// Extracts the `boundary` parameter of a Content-Type value.
pub fn boundary_of(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("boundary="))
        .map(|b| b.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

impl Upload {
    pub fn begin(content_type: &str) -> Self {
        Self {
            state: UploadState::AwaitingBoundaryStart,
            boundary: boundary_of(content_type),
            ..Self::default()
        }
    }

    pub fn advance<F: FileStore>(&mut self, buf: &mut Vec<u8>, store: &F, max_line: usize) -> Progress {
        let boundary = match &self.boundary {
            Some(b) => b.clone(),
            None => return Progress::Malformed("missing boundary"),
        };

        loop {
            match self.state {
                UploadState::None => return Progress::Malformed("not a multipart body"),
                UploadState::AwaitingBoundaryStart => match next_line(buf, max_line) {
                    Line::Pending => return Progress::Pending,
                    Line::TooLong => return Progress::Malformed("opening delimiter too long"),
                    Line::Ready(line) => {
                        if line.strip_prefix(b"--") != Some(boundary.as_bytes()) {
                            return Progress::Malformed("boundary mismatch");
                        }
                        self.state = UploadState::AwaitingFilePartHeaders;
                    }
                },
                UploadState::AwaitingFilePartHeaders => match next_line(buf, max_line) {
                    Line::Pending => return Progress::Pending,
                    Line::TooLong => return Progress::Malformed("part header too long"),
                    Line::Ready(line) if line.is_empty() => {
                        self.state = UploadState::ReceivingFileContent;
                    }
                    Line::Ready(line) => {
                        if self.file_name.is_none() {
                            self.file_name = file_name_of(&line);
                        }
                    }
                },
                UploadState::ReceivingFileContent => {
                    return self.receive_content(buf, store, &boundary);
                }
                UploadState::FileComplete => return Progress::Done,
            }
        }
    }

    fn receive_content<F: FileStore>(&mut self, buf: &mut Vec<u8>, store: &F, boundary: &str) -> Progress {
        let marker = format!("\r\n--{}--\r\n", boundary).into_bytes();

        // Without the marker, hold back a tail that could be its first half.
        let (save_len, found) = match find_bytes(buf, &marker) {
            Some(pos) => (pos, true),
            None => (buf.len().saturating_sub(marker.len() - 1), false),
        };

        if save_len > 0 {
            self.store_chunk(&buf[..save_len], store);
            buf.drain(..save_len);
        }

        if !found {
            return Progress::Pending;
        }

        buf.drain(..marker.len());
        if !self.created {
            self.store_chunk(&[], store);
        }
        self.state = UploadState::FileComplete;
        tracing::info!(
            file = self.file_name.as_deref().unwrap_or(""),
            bytes = self.bytes_written,
            "upload complete"
        );
        Progress::Done
    }

    fn store_chunk<F: FileStore>(&mut self, chunk: &[u8], store: &F) {
        let name = self.file_name.as_deref().unwrap_or("");
        let result = if self.created {
            store.append(name, chunk)
        } else {
            store.create(name, chunk)
        };
        self.created = true;

        match result {
            Ok(()) => self.bytes_written += chunk.len() as u64,
            Err(e) => {
                if !self.write_failed {
                    tracing::warn!(file = name, error = %e, "failed to store upload");
                }
                self.write_failed = true;
            }
        }
    }
}

/// First `filename="..."` on a part header line, literal up to the next quote.
fn file_name_of(line: &[u8]) -> Option<String> {
    const KEY: &[u8] = b"filename=\"";
    let start = find_bytes(line, KEY)? + KEY.len();
    let rest = &line[start..];
    let end = rest.iter().position(|&b| b == b'"').unwrap_or(rest.len());
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}
