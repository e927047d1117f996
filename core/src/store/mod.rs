//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The correlator and the builder call store methods; they never execute
//! SQL directly.

mod build_run;
mod expiration;

pub use build_run::BuildRunRecord;

use crate::error::PipelineResult;
use rusqlite::Connection;

pub struct PipelineStore {
    conn: Connection,
}

impl PipelineStore {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_expiration_cache.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_build_run.sql"))?;
        Ok(())
    }
}
