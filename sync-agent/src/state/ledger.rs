//! Per-file scan ledger.
//!
//! Every scanned file is upserted here each cycle. The pipeline never reads
//! it back; it exists for inspection and auditing of what the agent saw.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::manifest::{FileIndex, FileRecord};
use crate::utils::errors::Result;

pub const LEDGER_FILE: &str = "state.db";

const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
CREATE TABLE IF NOT EXISTS local_files (
    rel_path TEXT PRIMARY KEY,
    size INTEGER NOT NULL,
    mtime_utc TEXT NOT NULL,
    checksum TEXT NOT NULL,
    transfer_checksum TEXT NOT NULL,
    ext TEXT NOT NULL,
    modified_by_device_id TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    last_scanned_at_utc TEXT NOT NULL
);
";

pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Upsert every record of one scan in a single transaction.
    pub fn record_scan(&mut self, index: &FileIndex, scanned_at: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO local_files (rel_path, size, mtime_utc, checksum, transfer_checksum,
                    ext, modified_by_device_id, deleted, last_scanned_at_utc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(rel_path) DO UPDATE SET
                    size = excluded.size,
                    mtime_utc = excluded.mtime_utc,
                    checksum = excluded.checksum,
                    transfer_checksum = excluded.transfer_checksum,
                    ext = excluded.ext,
                    modified_by_device_id = excluded.modified_by_device_id,
                    deleted = excluded.deleted,
                    last_scanned_at_utc = excluded.last_scanned_at_utc",
            )?;
            for r in index.values() {
                stmt.execute(params![
                    r.rel_path,
                    r.size as i64,
                    r.mtime_utc,
                    r.checksum,
                    r.transfer_checksum,
                    r.ext,
                    r.modified_by_device_id,
                    r.deleted,
                    scanned_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(index.len())
    }

    pub fn get(&self, rel_path: &str) -> Result<Option<(FileRecord, String)>> {
        let row = self
            .conn
            .query_row(
                "SELECT rel_path, size, mtime_utc, checksum, transfer_checksum, ext,
                        modified_by_device_id, deleted, last_scanned_at_utc
                 FROM local_files WHERE rel_path = ?1",
                params![rel_path],
                |row| {
                    Ok((
                        FileRecord {
                            rel_path: row.get(0)?,
                            size: row.get::<_, i64>(1)? as u64,
                            mtime_utc: row.get(2)?,
                            checksum: row.get(3)?,
                            transfer_checksum: row.get(4)?,
                            ext: row.get(5)?,
                            modified_by_device_id: row.get(6)?,
                            deleted: row.get(7)?,
                        },
                        row.get(8)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM local_files", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
