use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema;

/// Shared handle to one SQLite connection.
///
/// rusqlite connections are not `Sync`; every access goes through the
/// mutex, and callers run on blocking threads.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open or create the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        let db = Self::prepare(conn, path.to_owned())?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// A private database that disappears with the handle.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::prepare(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn prepare(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.execute_batch(schema::PRAGMAS)
            .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

        let version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;
        match version {
            None => {
                conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [schema::SCHEMA_VERSION])?;
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(StoreError::Database(format!(
                    "database schema version {v} is newer than supported version {}",
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => debug!(version = v, "schema version"),
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Execute a closure with the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a closure inside a transaction. Commits on `Ok`, rolls back
    /// on `Err` (the transaction is dropped uncommitted).
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            path: self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
    }

    #[test]
    fn schema_version_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tern.db");
        drop(Database::open(&path).unwrap());
        let db = Database::open(&path).unwrap();
        let rows: Vec<u32> = db
            .with_conn(|conn| {
                Ok(conn
                    .prepare("SELECT version FROM schema_version")?
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<_, _>>()?)
            })
            .unwrap();
        assert_eq!(rows, vec![schema::SCHEMA_VERSION]);
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tern.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| Ok(conn.execute("UPDATE schema_version SET version = version + 1", [])?))
            .unwrap();
        drop(db);

        let err = Database::open(&path).err().unwrap();
        assert!(err.to_string().contains("newer"));
    }

    #[test]
    fn tables_created() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let tables: Vec<String> = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?;

            assert!(tables.contains(&"sessions".to_string()));
            assert!(tables.contains(&"messages".to_string()));
            assert!(tables.contains(&"parts".to_string()));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn open_file_database_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tern.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let db2 = Database::open(&path).unwrap();
        drop(db);
        drop(db2);
    }

    #[test]
    fn foreign_keys_enabled() {
        let db = Database::in_memory().unwrap();
        let on: i64 = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(on, 1);
    }

    #[test]
    fn with_tx_rolls_back_on_error() {
        let db = Database::in_memory().unwrap();
        let result: Result<(), StoreError> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO sessions (id, project_root, status, created_at, updated_at)
                 VALUES ('ses_x', '/tmp', 'active', 'now', 'now')",
                [],
            )?;
            Err(StoreError::Io("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}
