use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, params};

use crate::error::{FitroomError, StoreError};
use crate::types::{CostRecord, SavedOutfit};

use super::FitroomStore;
use super::schema;

/// SQLite-backed implementation of `FitroomStore`.
///
/// Records are stored as JSON payloads next to the few columns used for
/// ordering and trimming.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
            }
        }
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.conn.lock().expect("fitroom store mutex poisoned");

        conn.execute_batch("PRAGMA synchronous = NORMAL;")
            .map_err(StoreError::Sqlite)?;

        // WAL mode; ignored for in-memory databases
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;

        conn.execute(
            "INSERT OR IGNORE INTO fitroom_meta (key, value) VALUES ('schema_version', ?1)",
            params![schema::SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;

        Ok(())
    }

    fn decode_rows<T: serde::de::DeserializeOwned>(
        conn: &Connection,
        sql: &str,
    ) -> crate::error::Result<Vec<T>> {
        let mut stmt = conn.prepare(sql).map_err(StoreError::Sqlite)?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::Sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)?;

        payloads
            .iter()
            .map(|raw| {
                serde_json::from_str(raw)
                    .map_err(StoreError::Serialization)
                    .map_err(FitroomError::Store)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl FitroomStore for SqliteStore {
    // ── Cost records ───────────────────────────────────────────────

    async fn append_cost_record(
        &self,
        record: &CostRecord,
        keep: usize,
    ) -> crate::error::Result<()> {
        let payload = serde_json::to_string(record).map_err(StoreError::Serialization)?;
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);

        let conn = self.conn.lock().expect("fitroom store mutex poisoned");
        let tx = conn.unchecked_transaction().map_err(StoreError::Sqlite)?;
        tx.execute(
            "INSERT INTO cost_records (id, timestamp, model, cost_usd, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.timestamp.to_rfc3339(),
                record.model,
                record.cost_usd,
                payload
            ],
        )
        .map_err(StoreError::Sqlite)?;
        tx.execute(
            "DELETE FROM cost_records WHERE seq NOT IN (
                 SELECT seq FROM cost_records ORDER BY seq DESC LIMIT ?1
             )",
            params![keep],
        )
        .map_err(StoreError::Sqlite)?;
        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn cost_records(&self) -> crate::error::Result<Vec<CostRecord>> {
        let conn = self.conn.lock().expect("fitroom store mutex poisoned");
        Self::decode_rows(&conn, "SELECT payload FROM cost_records ORDER BY seq ASC")
    }

    async fn clear_cost_records(&self) -> crate::error::Result<u64> {
        let conn = self.conn.lock().expect("fitroom store mutex poisoned");
        let removed = conn
            .execute("DELETE FROM cost_records", [])
            .map_err(StoreError::Sqlite)?;
        Ok(removed as u64)
    }

    // ── Saved outfits ──────────────────────────────────────────────

    async fn insert_outfit(&self, outfit: &SavedOutfit) -> crate::error::Result<()> {
        let payload = serde_json::to_string(outfit).map_err(StoreError::Serialization)?;
        let conn = self.conn.lock().expect("fitroom store mutex poisoned");
        conn.execute(
            "INSERT INTO saved_outfits (id, created_at, payload) VALUES (?1, ?2, ?3)",
            params![outfit.id, outfit.created_at.to_rfc3339(), payload],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn outfits(&self) -> crate::error::Result<Vec<SavedOutfit>> {
        let conn = self.conn.lock().expect("fitroom store mutex poisoned");
        Self::decode_rows(&conn, "SELECT payload FROM saved_outfits ORDER BY seq DESC")
    }

    async fn delete_outfit(&self, id: &str) -> crate::error::Result<bool> {
        let conn = self.conn.lock().expect("fitroom store mutex poisoned");
        let removed = conn
            .execute("DELETE FROM saved_outfits WHERE id = ?1", params![id])
            .map_err(StoreError::Sqlite)?;
        Ok(removed > 0)
    }
}
