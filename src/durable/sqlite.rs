use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use crate::error::{PortmeshError, Result};
use crate::types::{PortSet, PortType, Widget, WidgetConnections};

use super::DurableStore;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS widgets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        serial_number TEXT NOT NULL UNIQUE,
        ports_bitmask TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS widget_connections (
        widget_sn TEXT PRIMARY KEY,
        p_peer_sn TEXT,
        q_peer_sn TEXT,
        r_peer_sn TEXT
    );
";

/// Rows per upsert statement. Four parameters per row keeps each statement
/// well below SQLite's bound-parameter limit.
const UPSERT_CHUNK_ROWS: usize = 200;

/// [`DurableStore`] backed by a SQLite database.
pub struct SqliteDurableStore {
    conn: Mutex<Connection>,
}

impl SqliteDurableStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!(path = %path.as_ref().display(), "durable.sqlite.open");
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of persisted connection rows.
    pub fn connection_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM widget_connections", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn upsert_sql(rows: usize) -> String {
    let mut sql = String::from(
        "INSERT INTO widget_connections (widget_sn, p_peer_sn, q_peer_sn, r_peer_sn) VALUES ",
    );
    for row in 0..rows {
        if row > 0 {
            sql.push(',');
        }
        let base = row * 4;
        sql.push_str(&format!(
            "(?{}, ?{}, ?{}, ?{})",
            base + 1,
            base + 2,
            base + 3,
            base + 4
        ));
    }
    sql.push_str(
        " ON CONFLICT (widget_sn) DO UPDATE SET
            p_peer_sn = excluded.p_peer_sn,
            q_peer_sn = excluded.q_peer_sn,
            r_peer_sn = excluded.r_peer_sn",
    );
    sql
}

fn map_duplicate(err: rusqlite::Error, serial: &str) -> PortmeshError {
    match err {
        rusqlite::Error::SqliteFailure(code, _) if code.code == ErrorCode::ConstraintViolation => {
            PortmeshError::invalid(format!("widget {serial} already exists"))
        }
        other => other.into(),
    }
}

impl DurableStore for SqliteDurableStore {
    fn create_widget(&self, widget: &Widget) -> Result<Widget> {
        widget.validate()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO widgets (name, serial_number, ports_bitmask) VALUES (?1, ?2, ?3)",
            params![widget.name, widget.serial_number, widget.ports.to_bit_string()],
        )
        .map_err(|err| map_duplicate(err, &widget.serial_number))?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO widget_connections (widget_sn) VALUES (?1)
             ON CONFLICT (widget_sn) DO NOTHING",
            params![widget.serial_number],
        )?;
        tx.commit()?;

        let mut created = widget.clone();
        created.id = u64::try_from(id)
            .map_err(|_| PortmeshError::Corruption(format!("negative widget id {id}")))?;
        debug!(serial = %created.serial_number, id = created.id, "durable.create_widget");
        Ok(created)
    }

    fn get_widget(&self, serial: &str) -> Result<Option<Widget>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, name, ports_bitmask FROM widgets WHERE serial_number = ?1",
                params![serial],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, name, bits)) = row else {
            return Ok(None);
        };
        let mut widget = Widget::new(name, serial, PortSet::from_bit_string(&bits)?);
        widget.id = u64::try_from(id)
            .map_err(|_| PortmeshError::Corruption(format!("negative widget id {id}")))?;
        Ok(Some(widget))
    }

    fn update_associations(&self, batch: &[WidgetConnections]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for chunk in batch.chunks(UPSERT_CHUNK_ROWS) {
            let mut stmt = tx.prepare_cached(&upsert_sql(chunk.len()))?;
            let values: Vec<Option<&str>> = chunk
                .iter()
                .flat_map(|conns| {
                    [
                        Some(conns.serial_number.as_str()),
                        conns.peer(PortType::P),
                        conns.peer(PortType::Q),
                        conns.peer(PortType::R),
                    ]
                })
                .collect();
            stmt.execute(params_from_iter(values.iter()))?;
        }
        tx.commit()?;
        debug!(rows = batch.len(), "durable.update_associations");
        Ok(())
    }

    fn get_connections(&self, serial: &str) -> Result<Option<WidgetConnections>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT p_peer_sn, q_peer_sn, r_peer_sn FROM widget_connections
                 WHERE widget_sn = ?1",
                params![serial],
                |row| {
                    Ok(WidgetConnections {
                        serial_number: serial.to_owned(),
                        p_peer: row.get(0)?,
                        q_peer: row.get(1)?,
                        r_peer: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
