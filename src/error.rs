use std::path::PathBuf;

use thiserror::Error;

/// Faults raised while resolving, loading or invoking a plugin.
///
/// Every fault is terminal for the single invocation or chain step that
/// raised it; nothing in this crate retries.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed action file, configuration pair or module reference.
    #[error("configuration error: {0}")]
    Config(String),

    /// No module file at the resolved location.
    #[error("module not found: {}", .0.display())]
    ModuleNotFound(PathBuf),

    /// The sandbox could not be constructed from the module.
    #[error("failed to load module '{module}': {reason}")]
    Load { module: String, reason: String },

    /// The module does not export the requested function.
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    /// The guest trapped, timed out or returned a fault code.
    #[error("call to '{function}' failed (code {code}): {reason}")]
    Call {
        function: String,
        code: i32,
        reason: String,
    },

    /// Storage read/write failure (request body, module file, managed file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key/value backend failure.
    #[error("key/value store error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the request path should decline and let the next handler run.
    ///
    /// Resolution failures never take the server down; they fall through.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            Error::ModuleNotFound(_) | Error::Load { .. } | Error::FunctionNotFound(_)
        )
    }

    /// Whether a file-event chain stops at this fault.
    ///
    /// A missing function only skips its own step.
    pub fn aborts_chain(&self) -> bool {
        !matches!(self, Error::FunctionNotFound(_))
    }

    /// True for an I/O error whose kind is `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
