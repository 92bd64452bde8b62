//! HTTP/1.1 subset: incremental request parsing (with multipart uploads),
//! route resolution and incremental response writing.
//!
//! ```text
//!  AwaitingLine ─▶ AwaitingHeaders ─▶ AwaitingBody ─▶ Complete
//!                                        │
//!                     multipart: BoundaryStart ─▶ PartHeaders ─▶ Content ─▶ FileComplete
//! ```
//!
//! Every parse step works on whatever is buffered and returns when it runs
//! out of bytes; the caller feeds more on the next readable event.

pub mod multipart;
pub mod request;
pub mod response;

pub use multipart::UploadState;
pub use request::{Method, ParseState, Request};
pub use response::{Body, Flush, Response, ResponseKind, Route, Transport};

pub(crate) enum Line {
    Ready(Vec<u8>),
    Pending,
    TooLong,
}

/// Pops one CRLF-terminated line (terminator stripped) off the front of `buf`.
pub(crate) fn next_line(buf: &mut Vec<u8>, max_line: usize) -> Line {
    match find_bytes(buf, b"\r\n") {
        Some(end) => {
            let line = buf[..end].to_vec();
            buf.drain(..end + 2);
            Line::Ready(line)
        }
        None if buf.len() > max_line => Line::TooLong,
        None => Line::Pending,
    }
}

pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::{FileStore, StoreError, StoreResult, is_plain_name};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::fs::File;

    /// In-memory store for parser tests.
    #[derive(Default)]
    pub(crate) struct MemStore {
        files: RefCell<BTreeMap<String, Vec<u8>>>,
    }

    impl MemStore {
        pub(crate) fn contents(&self, name: &str) -> Option<Vec<u8>> {
            self.files.borrow().get(name).cloned()
        }

        pub(crate) fn is_empty(&self) -> bool {
            self.files.borrow().is_empty()
        }
    }

    impl FileStore for MemStore {
        fn list(&self) -> StoreResult<Vec<String>> {
            Ok(self.files.borrow().keys().cloned().collect())
        }

        fn create(&self, name: &str, data: &[u8]) -> StoreResult<()> {
            if !is_plain_name(name) {
                return Err(StoreError::InvalidName(name.to_string()));
            }
            self.files.borrow_mut().insert(name.to_string(), data.to_vec());
            Ok(())
        }

        fn append(&self, name: &str, data: &[u8]) -> StoreResult<()> {
            if !is_plain_name(name) {
                return Err(StoreError::InvalidName(name.to_string()));
            }
            self.files
                .borrow_mut()
                .entry(name.to_string())
                .or_default()
                .extend_from_slice(data);
            Ok(())
        }

        fn delete(&self, name: &str) -> StoreResult<()> {
            self.files
                .borrow_mut()
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(name.to_string()))
        }

        fn open(&self, name: &str) -> StoreResult<File> {
            Err(StoreError::NotFound(name.to_string()))
        }

        fn size(&self, file: &File) -> StoreResult<u64> {
            Ok(file.metadata().map(|m| m.len()).unwrap_or(0))
        }
    }

    #[test]
    fn lines_are_popped_one_at_a_time() {
        let mut buf = b"first\r\nsecond\r\npart".to_vec();
        assert!(matches!(next_line(&mut buf, 64), Line::Ready(l) if l == b"first"));
        assert!(matches!(next_line(&mut buf, 64), Line::Ready(l) if l == b"second"));
        assert!(matches!(next_line(&mut buf, 64), Line::Pending));
        assert_eq!(buf, b"part");
    }

    #[test]
    fn unterminated_line_over_limit() {
        let mut buf = vec![b'a'; 65];
        assert!(matches!(next_line(&mut buf, 64), Line::TooLong));
    }

    #[test]
    fn find_bytes_edges() {
        assert_eq!(find_bytes(b"abc", b""), None);
        assert_eq!(find_bytes(b"ab", b"abc"), None);
        assert_eq!(find_bytes(b"xxabc", b"abc"), Some(2));
    }
}
