//! SQLite checkpoint store.
//!
//! Bundles live in one STRICT table keyed by `(name, seq)`. The DB
//! file and table are created if missing, and schema changes go
//! through [`rusqlite_migration`] so old checkpoint files keep
//! opening.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use super::{CheckpointBundle, CheckpointSeq, CheckpointStore};
use crate::errors::{Error, Result};

fn get_migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE checkpoints ( \
         created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP, \
         name TEXT NOT NULL, \
         seq INTEGER NOT NULL, \
         serialized_graph BLOB NOT NULL, \
         backend_state BLOB, \
         PRIMARY KEY (name, seq) \
         ) STRICT",
    )])
}

/// Setup our connection-level pragmas and bring the schema up to
/// date. Run this on each connection.
fn setup_conn(conn: &mut Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", "5000")?;
    get_migrations().to_latest(conn)?;
    Ok(())
}

fn to_seq(raw: i64) -> Result<CheckpointSeq> {
    CheckpointSeq::try_from(raw)
        .map_err(|_err| Error::InvalidState(format!("negative checkpoint seq {raw} in store")))
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a store at `db_file`.
    pub fn open(db_file: &Path) -> Result<Self> {
        tracing::debug!("Opening checkpoint store at {db_file:?}");
        let mut conn = Connection::open(db_file)?;
        setup_conn(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        setup_conn(&mut conn)?;
        Ok(Self { conn })
    }
}

impl CheckpointStore for SqliteStore {
    fn save(&mut self, name: &str, bundle: &CheckpointBundle) -> Result<CheckpointSeq> {
        let txn = self.conn.transaction()?;
        let seq: i64 = txn.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM checkpoints WHERE name = ?1",
            (name,),
            |row| row.get(0),
        )?;
        tracing::trace!("Saving checkpoint {name:?} #{seq}");
        txn.execute(
            "INSERT INTO checkpoints (name, seq, serialized_graph, backend_state) \
             VALUES (?1, ?2, ?3, ?4)",
            (
                name,
                seq,
                bundle.serialized_graph(),
                bundle.backend_state(),
            ),
        )?;
        txn.commit()?;
        to_seq(seq)
    }

    fn load(&self, name: &str, seq: CheckpointSeq) -> Result<Option<CheckpointBundle>> {
        let seq = i64::try_from(seq)
            .map_err(|_err| Error::InvalidState(format!("checkpoint seq {seq} too large")))?;
        let bundle = self
            .conn
            .query_row(
                "SELECT serialized_graph, backend_state FROM checkpoints \
                 WHERE name = ?1 AND seq = ?2",
                (name, seq),
                |row| Ok(CheckpointBundle::new(row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(bundle)
    }

    fn latest(&self, name: &str) -> Result<Option<CheckpointBundle>> {
        let bundle = self
            .conn
            .query_row(
                "SELECT serialized_graph, backend_state FROM checkpoints \
                 WHERE name = ?1 \
                 ORDER BY seq DESC \
                 LIMIT 1",
                (name,),
                |row| Ok(CheckpointBundle::new(row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(bundle)
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT name FROM checkpoints ORDER BY name")?;
        let names = stmt
            .query_map((), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }
}

#[test]
fn migrations_valid() -> rusqlite_migration::Result<()> {
    get_migrations().validate()
}

#[test]
fn save_and_load_in_memory() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let first = CheckpointBundle::new(b"g0".to_vec(), None);
    let second = CheckpointBundle::new(b"g1".to_vec(), Some(b"s1".to_vec()));

    assert_eq!(store.latest("run").unwrap(), None);
    assert_eq!(store.save("run", &first).unwrap(), 0);
    assert_eq!(store.save("run", &second).unwrap(), 1);
    assert_eq!(store.save("eval", &first).unwrap(), 0);

    assert_eq!(store.load("run", 0).unwrap(), Some(first));
    assert_eq!(store.latest("run").unwrap(), Some(second));
    assert_eq!(store.load("run", 5).unwrap(), None);
    assert_eq!(store.names().unwrap(), vec!["eval", "run"]);
}

#[test]
fn reopened_file_keeps_bundles() {
    let db_file = std::env::temp_dir().join(format!(
        "pipeloader-store-{}.sqlite3",
        fastrand::u64(..)
    ));
    let bundle = CheckpointBundle::new(b"graph".to_vec(), Some(b"state".to_vec()));

    {
        let mut store = SqliteStore::open(&db_file).unwrap();
        store.save("run", &bundle).unwrap();
    }
    let store = SqliteStore::open(&db_file).unwrap();
    assert_eq!(store.latest("run").unwrap(), Some(bundle));

    drop(store);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", db_file.display()));
    }
}
