//! File-event chaining: after a file is written, the action table of its
//! directory names the modules that rewrite it, one after another.

pub mod driver;
pub mod pipeline;
pub mod table;

pub use driver::{LocalFsDriver, MemoryDriver, StorageDriver};
pub use pipeline::{ChainReport, EventPipeline, FileEventNotifier};
pub use table::{plan, table_path, Action, ActionTable, EventKind, TABLE_FILE_NAME};
