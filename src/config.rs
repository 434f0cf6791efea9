use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;
use crate::plugin::{SandboxOptions, StaticConfig};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub files: FilesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest request body handed to a plugin
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PluginsConfig {
    /// Directory holding `<module>.wasm` files
    #[serde(default = "default_plugins_path")]
    pub path: PathBuf,
    /// Grant plugins WASI (stdio, allowed paths)
    #[serde(default)]
    pub wasi: bool,
    /// Per-call deadline in milliseconds, 0 disables it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Static configuration map. Request query parameters override it.
    /// Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KvBackendKind {
    #[default]
    Memory,
    Disk,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KvConfig {
    #[serde(default)]
    pub backend: KvBackendKind,
    /// Database file for the disk backend
    #[serde(default = "default_kv_path")]
    pub path: PathBuf,
}

/// File front end. Disabled unless `root` is set.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilesConfig {
    /// Directory the uploaded files live in; action tables and their
    /// modules sit next to the files they act on
    pub root: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_plugins_path() -> PathBuf {
    PathBuf::from("./plugins")
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_kv_path() -> PathBuf {
    PathBuf::from("./data/kv.redb")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            path: default_plugins_path(),
            wasi: false,
            timeout_ms: default_timeout_ms(),
            config: BTreeMap::new(),
        }
    }
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: KvBackendKind::Memory,
            path: default_kv_path(),
        }
    }
}

impl ServerConfig {
    /// `host:port`, as passed to the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PluginsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Sandbox options for request-driven calls
    pub fn sandbox_options(&self) -> SandboxOptions {
        SandboxOptions {
            wasi: self.wasi,
            timeout: self.timeout(),
        }
    }

    /// Freezes the static configuration map
    pub fn static_config(&self) -> StaticConfig {
        StaticConfig::new(self.config.clone())
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${KV_PATH}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Applies `key=value` pairs given on the command line on top of the
    /// `[plugins.config]` table. Later pairs win.
    pub fn apply_overrides(&mut self, pairs: &[String]) -> Result<(), Error> {
        for pair in pairs {
            let (key, value) = parse_config_pair(pair)?;
            self.plugins.config.insert(key, value);
        }
        Ok(())
    }
}

/// Splits `key=value` at the first `=`. The value may itself contain `=`.
pub fn parse_config_pair(pair: &str) -> Result<(String, String), Error> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(Error::Config(format!("invalid config entry: {pair}"))),
    }
}
