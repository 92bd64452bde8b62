//! File storage for the upload directory.
//!
//! Every operation takes a bare file name; names are resolved against the
//! directory the store was opened on and never escape it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("i/o error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the request handlers need from the upload directory.
pub trait FileStore {
    fn list(&self) -> StoreResult<Vec<String>>;
    fn create(&self, name: &str, data: &[u8]) -> StoreResult<()>;
    fn append(&self, name: &str, data: &[u8]) -> StoreResult<()>;
    fn delete(&self, name: &str) -> StoreResult<()>;
    fn open(&self, name: &str) -> StoreResult<File>;
    fn size(&self, file: &File) -> StoreResult<u64>;

    fn close(&self, file: File) {
        drop(file);
    }
}

/// A [`FileStore`] backed by a single directory on disk.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|source| StoreError::Io {
                name: root.display().to_string(),
                source,
            })?;
            tracing::info!(dir = %root.display(), "created upload directory");
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> StoreResult<PathBuf> {
        if !is_plain_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

/// True if `name` is exactly one normal path component.
pub fn is_plain_name(name: &str) -> bool {
    if name.is_empty() || name.contains('\0') || name.contains('/') || name.contains('\\') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn io_err(name: &str, source: io::Error) -> StoreError {
    if source.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(name.to_string())
    } else {
        StoreError::Io {
            name: name.to_string(),
            source,
        }
    }
}

impl FileStore for DirStore {
    fn list(&self) -> StoreResult<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_err(&self.root.display().to_string(), e))?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    fn create(&self, name: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.resolve(name)?;
        fs::write(&path, data).map_err(|e| io_err(name, e))
    }

    fn append(&self, name: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.resolve(name)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(name, e))?;
        file.write_all(data).map_err(|e| io_err(name, e))
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        let path = self.resolve(name)?;
        fs::remove_file(&path).map_err(|e| io_err(name, e))
    }

    fn open(&self, name: &str) -> StoreResult<File> {
        let path = self.resolve(name)?;
        let file = File::open(&path).map_err(|e| io_err(name, e))?;
        let meta = file.metadata().map_err(|e| io_err(name, e))?;
        if meta.is_dir() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(file)
    }

    fn size(&self, file: &File) -> StoreResult<u64> {
        file.metadata()
            .map(|m| m.len())
            .map_err(|source| StoreError::Io {
                name: "<open file>".to_string(),
                source,
            })
    }
}
