//! SQLite-backed stores
//!
//! Each store owns one connection behind a mutex. Transactions are explicit
//! (`BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK`) so that a coordinator can keep
//! one open across several store calls; mutations outside an open
//! transaction are refused.

mod metadata_store;
mod reference_store;

pub use metadata_store::SqliteMetadataStore;
pub use reference_store::SqliteReferenceStore;

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::error::StorageError;

/// A connection plus the explicit transaction protocol shared by the stores.
struct Database {
    label: &'static str,
    conn: Mutex<Connection>,
}

impl Database {
    fn open(path: &Path, label: &'static str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Storage(format!("open {}: {}", label, e)))?;
        Self::init(conn, label)
    }

    fn open_in_memory(label: &'static str) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Storage(format!("open_in_memory {}: {}", label, e)))?;
        Self::init(conn, label)
    }

    fn init(conn: Connection, label: &'static str) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StorageError::Storage(format!("init {}: {}", label, e)))?;
        Ok(Self {
            label,
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Storage(format!("{}: {}", self.label, e)))
    }

    /// The connection, provided a transaction is open.
    fn writer(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        let conn = self.lock()?;
        if conn.is_autocommit() {
            return Err(StorageError::Internal(format!(
                "{}: mutation outside a transaction",
                self.label
            )));
        }
        Ok(conn)
    }

    fn begin(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        if !conn.is_autocommit() {
            return Err(StorageError::Internal(format!(
                "{}: transaction already open",
                self.label
            )));
        }
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StorageError::Storage(format!("{}: begin: {}", self.label, e)))
    }

    fn commit(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        if conn.is_autocommit() {
            return Err(StorageError::Internal(format!(
                "{}: no open transaction",
                self.label
            )));
        }
        conn.execute_batch("COMMIT")
            .map_err(|e| StorageError::Storage(format!("{}: commit: {}", self.label, e)))
    }

    /// Roll back any open transaction. A connection poisoned by a panicking
    /// writer is rolled back too and made usable again.
    fn cancel(&self) {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                warn!(store = self.label, error = %err, "rollback failed");
                return;
            }
        }
        drop(conn);
        if self.conn.is_poisoned() {
            warn!(store = self.label, "recovered connection after a panic");
            self.conn.clear_poison();
        }
    }
}

fn to_millis(date: &DateTime<Utc>) -> i64 {
    date.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn parse_id(value: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(value).map_err(|e| StorageError::Storage(format!("parse id {}: {}", value, e)))
}

fn parse_url(value: Option<String>) -> Result<Option<Url>, StorageError> {
    value
        .map(|s| Url::parse(&s).map_err(|e| StorageError::Storage(format!("parse url {}: {}", s, e))))
        .transpose()
}

/// Map a uniqueness violation to `Duplicated(what)`, anything else as usual.
fn unique(err: rusqlite::Error, what: impl FnOnce() -> String) -> StorageError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::Duplicated(what())
        }
        other => other.into(),
    }
}
