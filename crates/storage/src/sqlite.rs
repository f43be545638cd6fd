use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::StorageError;
use crate::traits::{CacheEntry, LocalCache, WriteBatch};

/// Local cache backed by a single SQLite table of JSON values.
pub struct SqliteCache {
    conn: Connection,
}

impl SqliteCache {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        debug!(path, "opened local cache");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn current_revision(tx: &rusqlite::Transaction, key: &str) -> Result<u64, StorageError> {
    let revision: Option<i64> = tx
        .query_row(
            "SELECT revision FROM cache_entries WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(revision.map_or(0, |r| r as u64))
}

impl LocalCache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT value, revision FROM cache_entries WHERE key = ?1",
                rusqlite::params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((text, revision)) => Ok(Some(CacheEntry {
                value: serde_json::from_str(&text)?,
                revision: revision as u64,
            })),
        }
    }

    fn apply(&mut self, batch: &WriteBatch) -> Result<Vec<(String, u64)>, StorageError> {
        // Dropping the transaction on any early return rolls it back.
        let tx = self.conn.transaction()?;
        let mut revisions = Vec::with_capacity(batch.entries().len());

        for entry in batch.entries() {
            let found = current_revision(&tx, &entry.key)?;
            if let Some(expected) = entry.expected_revision {
                if expected != found {
                    return Err(StorageError::RevisionConflict {
                        key: entry.key.clone(),
                        expected,
                        found,
                    });
                }
            }

            match &entry.value {
                Some(value) => {
                    let next = found + 1;
                    tx.execute(
                        "INSERT INTO cache_entries (key, value, revision) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET
                            value = excluded.value,
                            revision = excluded.revision,
                            updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
                        rusqlite::params![entry.key, serde_json::to_string(value)?, next as i64],
                    )?;
                    revisions.push((entry.key.clone(), next));
                }
                None => {
                    tx.execute(
                        "DELETE FROM cache_entries WHERE key = ?1",
                        rusqlite::params![entry.key],
                    )?;
                    revisions.push((entry.key.clone(), 0));
                }
            }
        }

        tx.commit()?;
        Ok(revisions)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(rusqlite::params![prefix], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}
