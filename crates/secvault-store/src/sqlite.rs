//! SQLite audit log.
//!
//! Entries are stored as JSON alongside indexed identifier columns. The
//! schema's triggers reject UPDATE and DELETE, so a written row is final.
//! Queries run on the blocking pool via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use secvault_core::{now_millis, DocumentId, SubjectId};
use secvault_perms::{AuditEntry, AuditError, AuditLog, AuditRecord};

use crate::error::{Result, StoreError};
use crate::migration;

/// Durable audit log backed by a single SQLite connection.
///
/// Cloning shares the connection. Appends are serialized by the connection
/// mutex, so sequence numbers are dense and ordered.
#[derive(Clone)]
pub struct SqliteAuditLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditLog {
    /// Open or create a database at `path` and migrate it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Insert one entry and return its sequence number.
    pub async fn insert(&self, entry: AuditEntry) -> Result<u64> {
        self.run(move |conn| {
            let json = serde_json::to_string(&entry)?;
            conn.execute(
                "INSERT INTO audit_log (at, kind, actor, document, subject, emergency, entry, written_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.at,
                    entry.kind.name(),
                    entry.actor.as_ref().map(|id| id.as_bytes().as_slice()),
                    entry.document.as_ref().map(|id| id.as_bytes().as_slice()),
                    entry.subject.as_ref().map(|id| id.as_bytes().as_slice()),
                    entry.emergency,
                    json,
                    now_millis(),
                ],
            )?;
            let seq = conn.last_insert_rowid() as u64;
            debug!(seq, kind = entry.kind.name(), "audit entry written");
            Ok(seq)
        })
        .await
    }

    /// All records in sequence order.
    pub async fn all(&self) -> Result<Vec<AuditRecord>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT seq, entry FROM audit_log ORDER BY seq")?;
            let rows = stmt.query_map([], read_row)?;
            collect(rows)
        })
        .await
    }

    /// Records concerning one document, via the document index.
    pub async fn by_document(&self, document: DocumentId) -> Result<Vec<AuditRecord>> {
        self.run(move |conn| {
            let mut stmt =
                conn.prepare("SELECT seq, entry FROM audit_log WHERE document = ?1 ORDER BY seq")?;
            let rows = stmt.query_map([document.as_bytes().as_slice()], read_row)?;
            collect(rows)
        })
        .await
    }

    /// Records concerning one subject, via the subject index.
    pub async fn by_subject(&self, subject: SubjectId) -> Result<Vec<AuditRecord>> {
        self.run(move |conn| {
            let mut stmt =
                conn.prepare("SELECT seq, entry FROM audit_log WHERE subject = ?1 ORDER BY seq")?;
            let rows = stmt.query_map([subject.as_bytes().as_slice()], read_row)?;
            collect(rows)
        })
        .await
    }

    /// Number of records.
    pub async fn len(&self) -> Result<u64> {
        self.run(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<(i64, String)>>,
) -> Result<Vec<AuditRecord>> {
    rows.map(|row| {
        let (seq, json) = row?;
        let entry: AuditEntry = serde_json::from_str(&json).map_err(|e| {
            warn!(seq, error = %e, "undecodable audit row");
            StoreError::InvalidData(format!("audit row {seq}: {e}"))
        })?;
        Ok(AuditRecord {
            seq: seq as u64,
            entry,
        })
    })
    .collect()
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn append(&self, entry: AuditEntry) -> std::result::Result<u64, AuditError> {
        self.insert(entry).await.map_err(StoreError::into_write_error)
    }

    async fn entries(&self) -> std::result::Result<Vec<AuditRecord>, AuditError> {
        self.all().await.map_err(StoreError::into_read_error)
    }

    async fn for_document(
        &self,
        document: &DocumentId,
    ) -> std::result::Result<Vec<AuditRecord>, AuditError> {
        self.by_document(*document)
            .await
            .map_err(StoreError::into_read_error)
    }
}
