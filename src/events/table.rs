//! Directory-scoped action tables.
//!
//! A table is a JSON object in `<dir>/.wasmhook.json` mapping hook names to
//! ordered lists of actions:
//!
//! ```json
//! {
//!   "after_file_put": [
//!     { "module": "reverse.wasm" },
//!     { "module": "stamp.wasm", "allowed_hosts": ["api.example.com"] }
//!   ]
//! }
//! ```
//!
//! Everything here is pure: callers hand in the table bytes they fetched.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::plugin::{Permissions, MODULE_EXTENSION};

/// File name of the action table inside a directory.
pub const TABLE_FILE_NAME: &str = ".wasmhook.json";

/// File hooks exposed by the storage front end. The name of each hook is
/// also the export a module implements to take part in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    AfterFilePut,
    AfterCurDirChanged,
    AfterDirCreated,
    AfterDirDeleted,
    AfterFileDeleted,
    AfterFileDownloaded,
    AfterUserLogin,
    BeforeChangeCurDir,
    BeforeCreateDir,
    BeforeDeleteDir,
    BeforeDeleteFile,
    BeforeDownloadFile,
    BeforeLoginUser,
    BeforePutFile,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::AfterFilePut,
        EventKind::AfterCurDirChanged,
        EventKind::AfterDirCreated,
        EventKind::AfterDirDeleted,
        EventKind::AfterFileDeleted,
        EventKind::AfterFileDownloaded,
        EventKind::AfterUserLogin,
        EventKind::BeforeChangeCurDir,
        EventKind::BeforeCreateDir,
        EventKind::BeforeDeleteDir,
        EventKind::BeforeDeleteFile,
        EventKind::BeforeDownloadFile,
        EventKind::BeforeLoginUser,
        EventKind::BeforePutFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AfterFilePut => "after_file_put",
            EventKind::AfterCurDirChanged => "after_cur_dir_changed",
            EventKind::AfterDirCreated => "after_dir_created",
            EventKind::AfterDirDeleted => "after_dir_deleted",
            EventKind::AfterFileDeleted => "after_file_deleted",
            EventKind::AfterFileDownloaded => "after_file_downloaded",
            EventKind::AfterUserLogin => "after_user_login",
            EventKind::BeforeChangeCurDir => "before_change_cur_dir",
            EventKind::BeforeCreateDir => "before_create_dir",
            EventKind::BeforeDeleteDir => "before_delete_dir",
            EventKind::BeforeDeleteFile => "before_delete_file",
            EventKind::BeforeDownloadFile => "before_download_file",
            EventKind::BeforeLoginUser => "before_login_user",
            EventKind::BeforePutFile => "before_put_file",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Export a module must provide to handle this hook.
    pub fn export_name(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Action {
    /// Module file name, resolved in the triggering file's directory.
    #[serde(alias = "plugin")]
    pub module: String,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default)]
    pub allowed_paths: BTreeMap<String, String>,
}

impl Action {
    pub fn permissions(&self) -> Permissions {
        Permissions {
            allowed_hosts: self.allowed_hosts.clone(),
            allowed_paths: self.allowed_paths.clone(),
        }
    }

    /// Virtual path of the module next to the triggering file. Module names
    /// must be plain file names.
    pub fn module_location(&self, dir: &str) -> Result<String> {
        let name = self.module.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(Error::Config(format!("invalid module name '{name}'")));
        }
        Ok(join(dir, name))
    }
}

/// Parsed action table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionTable {
    chains: BTreeMap<EventKind, Vec<Action>>,
}

impl ActionTable {
    /// Unknown hook names are logged and dropped; anything that is not a
    /// JSON object of action arrays is a configuration error.
    pub fn parse(document: &[u8]) -> Result<Self> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_slice(document)
            .map_err(|e| Error::Config(format!("malformed action table: {e}")))?;

        let mut chains = BTreeMap::new();
        for (name, value) in raw {
            let Some(kind) = EventKind::from_name(&name) else {
                warn!("Ignoring unknown hook '{name}' in action table");
                continue;
            };
            let actions: Vec<Action> = serde_json::from_value(value)
                .map_err(|e| Error::Config(format!("malformed actions for '{name}': {e}")))?;
            chains.insert(kind, actions);
        }
        Ok(Self { chains })
    }

    pub fn actions(&self, kind: EventKind) -> &[Action] {
        self.chains.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Ordered actions for `kind`, given the table document if the directory
/// has one. No document means no actions.
pub fn plan(kind: EventKind, document: Option<&[u8]>) -> Result<Vec<Action>> {
    match document {
        Some(document) => Ok(ActionTable::parse(document)?.actions(kind).to_vec()),
        None => Ok(Vec::new()),
    }
}

/// Directory part of a virtual path (`/a/b.txt` → `/a`, `b.txt` → ``).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => "",
    }
}

/// Location of the action table governing `file_path`.
pub fn table_path(file_path: &str) -> String {
    join(parent_dir(file_path), TABLE_FILE_NAME)
}

/// Module files and action tables never trigger a chain.
pub fn is_reserved(file_path: &str) -> bool {
    file_path.ends_with(&format!(".{MODULE_EXTENSION}")) || file_path.ends_with(TABLE_FILE_NAME)
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
