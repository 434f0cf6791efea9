//! Plugin invocation core: module loading, configuration merging,
//! function resolution and sandboxed calls.
//!
//! Every call follows the same shape:
//!
//! 1. Build a [`ModuleDescriptor`] from module bytes and permissions
//! 2. Merge static configuration with per-call overrides
//! 3. Load a [`SandboxedInstance`] with the [`HostCapabilities`] for this call
//! 4. Check the export, call it, drop the instance

pub mod descriptor;
pub mod invoker;
pub mod merge;
pub mod resolver;

pub use descriptor::{module_path, ModuleDescriptor, Permissions, MODULE_EXTENSION};
pub use invoker::{CallOutput, SandboxOptions, SandboxedInstance, DEFAULT_CALL_TIMEOUT};
pub use merge::{query_overrides, ConfigMap, StaticConfig};
pub use resolver::{ContentTag, Resolved, Route, Strategy, DEFAULT_RESPONDER};

pub use crate::kv::HostCapabilities;
