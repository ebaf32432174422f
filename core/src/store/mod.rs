//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! The pipeline never executes SQL; it hands a finished RunArtifacts
//! to commit_run, which writes every table inside ONE transaction.
//! A failed commit leaves no rows for that run.

mod commit;
mod query;

use crate::{artifacts::RunArtifacts, error::EngineResult};
use rusqlite::Connection;

pub use query::{ArtifactTable, StoredUplift};

pub struct ArtifactStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl ArtifactStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// The backing file, None for an in-memory store.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_artifacts.sql"))?;
        Ok(())
    }

    /// Persist a whole run atomically.
    pub fn commit_run(&mut self, artifacts: &RunArtifacts) -> EngineResult<()> {
        let tx = self.conn.transaction()?;
        commit::insert_run(&tx, &artifacts.manifest)?;
        commit::insert_rfm(&tx, artifacts)?;
        commit::insert_customer_value(&tx, artifacts)?;
        commit::insert_uplift_ranked(&tx, artifacts)?;
        commit::insert_eligible(&tx, artifacts)?;
        commit::insert_targets(&tx, artifacts)?;
        commit::insert_model_blobs(&tx, artifacts)?;
        commit::insert_events(&tx, artifacts)?;
        tx.commit()?;
        log::info!("store: committed run {}", artifacts.run_id());
        Ok(())
    }
}
