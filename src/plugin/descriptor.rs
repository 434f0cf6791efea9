use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};

/// File extension of plugin modules.
pub const MODULE_EXTENSION: &str = "wasm";

const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// What a module may reach outside the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    /// Hosts the guest may contact over HTTP.
    pub allowed_hosts: Vec<String>,
    /// Host path → guest path. Only effective when the sandbox has OS-like
    /// capabilities enabled.
    pub allowed_paths: BTreeMap<String, String>,
}

impl Permissions {
    /// No network, no filesystem.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Module bytes plus what the module is allowed to touch.
///
/// Built fresh for every invocation and never mutated afterwards; the
/// bytes are shared so cloning a descriptor is cheap.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    name: String,
    bytes: Arc<[u8]>,
    permissions: Permissions,
}

impl ModuleDescriptor {
    /// Wraps raw module bytes. Fails with a load error when the bytes are
    /// not a WebAssembly binary.
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        permissions: Permissions,
    ) -> Result<Self> {
        let name = name.into();
        let bytes = bytes.into();
        if !bytes.starts_with(WASM_MAGIC) {
            return Err(Error::Load {
                module: name,
                reason: "not a WebAssembly binary".to_string(),
            });
        }
        Ok(Self {
            name,
            bytes: bytes.into(),
            permissions,
        })
    }

    /// Reads a module file. A missing file is `ModuleNotFound`; any other
    /// read failure is an I/O error.
    pub async fn from_file(path: &Path, permissions: Permissions) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ModuleNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Read module {} ({} bytes)", path.display(), bytes.len());
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_bytes(name, bytes, permissions)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }
}

/// Location of module `name` under `root`: `<root>/<name>.wasm`.
pub fn module_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.{MODULE_EXTENSION}"))
}
