use std::path::PathBuf;
use std::time::Duration;

use extism::{Manifest, Plugin, PluginBuilder, Wasm};
use tracing::{debug, trace, warn};

use super::descriptor::ModuleDescriptor;
use super::merge::ConfigMap;
use crate::error::{Error, Result};
use crate::kv::HostCapabilities;

/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Code the sandbox reports for a trap or an interrupted call (deadline
/// hit). Never a status chosen by the guest.
const SANDBOX_ABORT_CODE: i32 = 134;

/// How a sandbox is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOptions {
    /// Grant OS-like capabilities (WASI: stdio, allowed paths).
    pub wasi: bool,
    /// Wall-clock limit for a single call; `None` lets a call run to
    /// completion.
    pub timeout: Option<Duration>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            wasi: false,
            timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }
}

impl SandboxOptions {
    pub fn with_wasi(mut self, wasi: bool) -> Self {
        self.wasi = wasi;
        self
    }
}

/// Raw result of a guest call: the guest's return code and its output.
///
/// Code 0 is success. A positive code is a status the guest chose to
/// return, and `output` then holds the guest's error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutput {
    pub code: i32,
    pub output: Vec<u8>,
}

impl CallOutput {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// A live sandbox for exactly one call.
///
/// `call` consumes the instance, so whatever happens inside it the
/// sandbox is dropped and its resources reclaimed before `call` returns.
pub struct SandboxedInstance {
    module: String,
    plugin: Plugin,
}

impl SandboxedInstance {
    /// Builds a sandbox from a descriptor, a merged configuration map and
    /// the host capabilities for this invocation.
    pub fn load(
        descriptor: &ModuleDescriptor,
        config: &ConfigMap,
        capabilities: &HostCapabilities,
        options: &SandboxOptions,
    ) -> Result<Self> {
        let permissions = descriptor.permissions();
        let mut manifest = Manifest::new([Wasm::data(descriptor.bytes().to_vec())])
            .with_config(config.iter().map(|(k, v)| (k.clone(), v.clone())))
            .with_allowed_hosts(permissions.allowed_hosts.iter().cloned())
            .with_allowed_paths(
                permissions
                    .allowed_paths
                    .iter()
                    .map(|(host, guest)| (host.clone(), PathBuf::from(guest))),
            );
        if let Some(timeout) = options.timeout {
            manifest = manifest.with_timeout(timeout);
        }

        let plugin = PluginBuilder::new(manifest)
            .with_wasi(options.wasi)
            .with_functions(capabilities.functions())
            .build()
            .map_err(|e| {
                warn!("Failed to create sandbox for {}: {e}", descriptor.name());
                Error::Load {
                    module: descriptor.name().to_string(),
                    reason: e.to_string(),
                }
            })?;

        debug!(
            "Loaded {} (wasi: {}, {} config entries)",
            descriptor.name(),
            options.wasi,
            config.len()
        );
        Ok(Self {
            module: descriptor.name().to_string(),
            plugin,
        })
    }

    pub fn function_exists(&self, name: &str) -> bool {
        self.plugin.function_exists(name)
    }

    /// Calls `name` with `input` and releases the sandbox.
    ///
    /// A missing export is `FunctionNotFound` and never reaches the guest.
    /// Traps, timeouts and non-positive fault codes are `Call` errors; a
    /// positive code only counts as a status when the guest returned it.
    pub fn call(mut self, name: &str, input: &[u8]) -> Result<CallOutput> {
        if !self.function_exists(name) {
            return Err(Error::FunctionNotFound(name.to_string()));
        }

        debug!("{}.{} input size: {}", self.module, name, input.len());
        match self.plugin.call_get_error_code::<&[u8], Vec<u8>>(name, input) {
            Ok(output) => Ok(CallOutput { code: 0, output }),
            Err((e, code)) if code > 0 && code != SANDBOX_ABORT_CODE => {
                debug!("{}.{} returned code {code}: {e}", self.module, name);
                Ok(CallOutput {
                    code,
                    output: e.to_string().into_bytes(),
                })
            }
            Err((e, code)) => {
                warn!("{}.{} failed (code {code}): {e}", self.module, name);
                Err(Error::Call {
                    function: name.to_string(),
                    code,
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl Drop for SandboxedInstance {
    fn drop(&mut self) {
        trace!("Released sandbox for {}", self.module);
    }
}
