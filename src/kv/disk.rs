use std::path::Path;

use redb::{Database, TableDefinition};
use tracing::info;

use super::KvBackend;
use crate::error::{Error, Result};

const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Persistent backend: a single redb file with one table.
pub struct DiskBackend {
    db: Database,
}

impl DiskBackend {
    /// Opens (or creates) the database and makes sure the table exists,
    /// so reads of a fresh file find an empty table instead of failing.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path).map_err(storage)?;

        let write_txn = db.begin_write().map_err(storage)?;
        {
            let _table = write_txn.open_table(KV_TABLE).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;

        info!("Disk key/value store at {}", path.display());
        Ok(Self { db })
    }
}

impl KvBackend for DiskBackend {
    fn name(&self) -> &str {
        "disk"
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(KV_TABLE).map_err(storage)?;
        let value = table
            .get(key)
            .map_err(storage)?
            .map(|guard| guard.value().to_vec())
            .unwrap_or_default();
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let mut table = write_txn.open_table(KV_TABLE).map_err(storage)?;
            table.insert(key, value).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;
        Ok(())
    }
}

fn storage(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}
