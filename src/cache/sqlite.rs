use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::Result;

use super::backend::{KvBackend, KvTransaction};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv_hash (
        key TEXT NOT NULL,
        field TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (key, field)
    );
    CREATE TABLE IF NOT EXISTS kv_list (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        list TEXT NOT NULL,
        value TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_kv_list_list_seq ON kv_list (list, seq);
";

/// [`KvBackend`] on top of SQLite.
///
/// Every script runs inside one `BEGIN IMMEDIATE` transaction, which is rolled
/// back if the script fails.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (or creates) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(path = %path.as_ref().display(), "cache.sqlite.open");
        Self::with_connection(conn)
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KvBackend for SqliteBackend {
    fn transaction(
        &self,
        script: &mut dyn FnMut(&mut dyn KvTransaction) -> Result<()>,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        script(&mut SqliteTxn { tx: &tx })?;
        tx.commit()?;
        Ok(())
    }
}

struct SqliteTxn<'a> {
    tx: &'a Transaction<'a>,
}

impl KvTransaction for SqliteTxn<'_> {
    fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT value FROM kv_hash WHERE key = ?1 AND field = ?2")?;
        Ok(stmt
            .query_row(params![key, field], |row| row.get(0))
            .optional()?)
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (key, field) DO UPDATE SET value = excluded.value",
        )?;
        stmt.execute(params![key, field, value])?;
        Ok(())
    }

    fn hdel(&mut self, key: &str, field: &str) -> Result<bool> {
        let mut stmt = self
            .tx
            .prepare_cached("DELETE FROM kv_hash WHERE key = ?1 AND field = ?2")?;
        Ok(stmt.execute(params![key, field])? > 0)
    }

    fn hgetall(&mut self, key: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT field, value FROM kv_hash WHERE key = ?1 ORDER BY field")?;
        let rows = stmt.query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn rpush(&mut self, list: &str, value: &str) -> Result<usize> {
        {
            let mut stmt = self
                .tx
                .prepare_cached("INSERT INTO kv_list (list, value) VALUES (?1, ?2)")?;
            stmt.execute(params![list, value])?;
        }
        self.llen(list)
    }

    fn lpop(&mut self, list: &str, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let popped: Vec<(i64, String)> = {
            let mut stmt = self.tx.prepare_cached(
                "SELECT seq, value FROM kv_list WHERE list = ?1 ORDER BY seq LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![list, limit], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        if let Some((last_seq, _)) = popped.last() {
            let mut stmt = self
                .tx
                .prepare_cached("DELETE FROM kv_list WHERE list = ?1 AND seq <= ?2")?;
            stmt.execute(params![list, last_seq])?;
        }
        Ok(popped.into_iter().map(|(_, value)| value).collect())
    }

    fn llen(&mut self, list: &str) -> Result<usize> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT COUNT(*) FROM kv_list WHERE list = ?1")?;
        let len: i64 = stmt.query_row(params![list], |row| row.get(0))?;
        Ok(usize::try_from(len).unwrap_or_default())
    }
}
