//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Orchestrators call store methods. They never execute SQL directly.
//!
//! No transactions span multiple inserts. Every write that can race
//! (retried ticks, concurrent first callers) is an insert-or-ignore on a
//! natural key followed by a lookup, so duplicate work converges on the
//! first writer's row.

mod artifact;
mod decision;
mod metric;
mod outcome;
mod simulation;
mod timeline;

pub use metric::MetricRow;

use crate::{error::SimResult, types::InsertOutcome};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

pub struct SimStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl SimStore {
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Open an in-memory database with the schema applied.
    pub fn in_memory_migrated() -> SimResult<Self> {
        let store = Self::in_memory()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn()
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    /// Lock the connection. A poisoned lock is recovered: the
    /// connection itself stays usable after a panicking holder.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn insert_outcome(changed: usize) -> InsertOutcome {
    if changed > 0 {
        InsertOutcome::Inserted
    } else {
        InsertOutcome::Existing
    }
}

/// Read a JSON text column into a typed value.
fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
