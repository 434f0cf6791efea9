//! Process-wide key/value store exposed to plugins.
//!
//! One store is shared by every invocation (HTTP and file events alike);
//! it is not scoped to a module, a directory or a request.
//!
//! Consistency is relaxed: writes are serialized by a single
//! mutation lock, reads take no lock at all and may observe a write that
//! is happening concurrently. There is no atomic read-modify-write; a
//! caller that needs one has to build it on top.

pub mod disk;
pub mod host;

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{KvBackendKind, KvConfig};
use crate::error::Result;

pub use disk::DiskBackend;
pub use host::HostCapabilities;

/// Storage behind the store.
///
/// Implementations must return an empty value for an unknown key, never
/// an error. Serialization of writes is the job of [`KvStore`], not of
/// the backend.
pub trait KvBackend: Send + Sync {
    /// Short name used in logs ("memory", "disk").
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Vec<u8>>;

    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// In-memory backend. Reads go straight to the concurrent map.
#[derive(Default)]
pub struct MemoryBackend {
    data: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self
            .data
            .get(key)
            .map(|v| v.value().clone())
            .unwrap_or_default())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.data.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Shared handle to the store. Cheap to clone.
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn KvBackend>,
    write_lock: Arc<Mutex<()>>,
}

impl KvStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// A store backed by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Opens the backend selected in configuration.
    pub fn open(config: &KvConfig) -> Result<Self> {
        let store = match config.backend {
            KvBackendKind::Memory => Self::in_memory(),
            KvBackendKind::Disk => Self::new(Arc::new(DiskBackend::open(&config.path)?)),
        };
        info!("Key/value store opened ({} backend)", store.backend_name());
        Ok(store)
    }

    /// Opens a disk-backed store at `path`.
    pub fn on_disk(path: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(DiskBackend::open(path)?)))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Reads `key`. Unknown keys read as empty bytes. Takes no lock.
    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        let value = self.backend.get(key)?;
        debug!("kv read {key} ({} bytes)", value.len());
        Ok(value)
    }

    /// Writes `key`, serialized against every other write in the process.
    pub fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.backend.set(key, value)?;
        debug!("kv write {key} ({} bytes)", value.len());
        Ok(())
    }
}
