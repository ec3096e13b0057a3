use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::http::multipart::FormLimits;
use crate::http::reader::DEFAULT_HEAD_LIMIT;
use crate::http::response::DEFAULT_RESPONSE_BUFFER;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Environment variable naming a YAML config file.
pub const CONFIG_PATH_ENV: &str = "HTTPD_CONFIG";

/// Environment variable overriding `listen_addr`.
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Budget for a request line plus headers.
    pub max_head_bytes: u64,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// Body bytes a response buffers before it switches to chunked
    /// encoding.
    pub response_buffer_size: usize,
    pub form: FormLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_head_bytes: DEFAULT_HEAD_LIMIT,
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            response_buffer_size: DEFAULT_RESPONSE_BUFFER,
            form: FormLimits::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from the file named by `HTTPD_CONFIG`, or
    /// the defaults when it is unset. `LISTEN` overrides the listen address
    /// either way.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(addr) = std::env::var(LISTEN_ENV) {
            cfg.listen_addr = addr;
        }

        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parses YAML; missing fields take their defaults.
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        Ok(cfg)
    }
}
