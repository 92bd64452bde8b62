use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    /// Listing page; the built-in one is used when unset.
    pub template: Option<PathBuf>,
    pub timeout_seconds: u64,
    pub max_line_bytes: usize,
    pub read_chunk_size: usize,
    pub max_events: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            upload_dir: PathBuf::from("filedir"),
            template: None,
            timeout_seconds: 30,
            max_line_bytes: 8192,
            read_chunk_size: 4096,
            max_events: 1024,
        }
    }
}

impl Config {
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
