use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Server settings, read from YAML.
///
/// Every field has a default, so a partial file (or none at all) is fine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Worker threads; 0 means one per available CPU.
    pub workers: usize,
    /// Per-worker read buffer, also the largest request head accepted.
    pub buffer_size: usize,
    /// Readiness events fetched per poll.
    pub max_events: usize,
    pub max_body_size: usize,
    /// Files above this many bytes are streamed instead of cached.
    pub cache_max_file_size: u64,
    pub users_file: PathBuf,
    pub mime_file: PathBuf,
    pub static_dir: PathBuf,
    pub pages_dir: PathBuf,
    pub bcrypt_cost: u32,
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            workers: 0,
            buffer_size: 1 << 13,
            max_events: 64,
            max_body_size: 1 << 20,
            cache_max_file_size: 1 << 20,
            users_file: PathBuf::from("db/users"),
            mime_file: PathBuf::from("config/mimes"),
            static_dir: PathBuf::from("share"),
            pages_dir: PathBuf::from("pages"),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            write_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Reads the file named by `SERVER_CONFIG` (default
    /// `config/server.yaml`); `LISTEN` overrides the listen address.
    pub fn load() -> anyhow::Result<Self> {
        let path =
            std::env::var("SERVER_CONFIG").unwrap_or_else(|_| "config/server.yaml".to_string());
        let mut cfg = Self::from_file(&path)?;
        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.listen_addr = listen_addr;
        }
        Ok(cfg)
    }

    /// A missing file yields the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen_addr
            .to_socket_addrs()
            .with_context(|| format!("resolving {}", self.listen_addr))?
            .next()
            .with_context(|| format!("{} resolves to no address", self.listen_addr))
    }

    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
