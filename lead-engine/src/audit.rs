//! Append-only ledger of pipeline decisions.
//!
//! Entries are immutable once written: there is no update path at all,
//! and deletion requires an administrative caller. The ledger is a
//! history, not a cache; re-evaluating a lead appends fresh entries.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::EngineError;
use crate::lead::{CustomerId, LeadId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct AuditEntryId(pub Uuid);

impl AuditEntryId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Validation,
    DuplicateDetection,
    Assignment,
    Verification,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Validation => "validation",
            AuditKind::DuplicateDetection => "duplicate_detection",
            AuditKind::Assignment => "assignment",
            AuditKind::Verification => "verification",
        }
    }
}

/// Role of the caller attempting a ledger operation. Only appends are
/// unprivileged; deletion requires `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRole {
    Standard,
    Admin,
}

/// A decision record as submitted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub lead_id: LeadId,
    pub customer_id: Option<CustomerId>,
    pub kind: AuditKind,
    pub outcome: String,
    pub duration: Duration,
    pub details: serde_json::Value,
}

/// A persisted, immutable decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub lead_id: LeadId,
    pub customer_id: Option<CustomerId>,
    pub kind: AuditKind,
    pub outcome: String,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// Write-only append interface exposed to the pipeline. Safe under
/// concurrent writers; appends for different leads interleave freely
/// and ordering is only meaningful within one lead's history.
#[async_trait]
pub trait AuditSink {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntryId, EngineError>;
}

/// In-memory ledger for tests and local development.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<AuditEntry>>,
    fail_appends: std::sync::atomic::AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated append failure, for exercising the hard-failure
    /// path in the pipeline.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn entries_for(&self, lead_id: LeadId) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.lead_id == lead_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries are immutable; any update attempt is rejected without
    /// touching the stored entry.
    pub fn try_update(&self, _id: AuditEntryId, _outcome: &str) -> Result<(), EngineError> {
        Err(EngineError::AuditImmutable)
    }

    /// Deletion is restricted to administrative callers.
    pub fn delete(&self, id: AuditEntryId, role: LedgerRole) -> Result<(), EngineError> {
        if role != LedgerRole::Admin {
            return Err(EngineError::AuditDeleteForbidden);
        }
        self.entries.lock().unwrap().retain(|e| e.id != id);
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryLedger {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntryId, EngineError> {
        if self.fail_appends.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EngineError::QueryError {
                command: "append_audit_entry".to_owned(),
                error: sqlx::Error::PoolClosed,
            });
        }
        let id = AuditEntryId::new();
        self.entries.lock().unwrap().push(AuditEntry {
            id,
            lead_id: entry.lead_id,
            customer_id: entry.customer_id,
            kind: entry.kind,
            outcome: entry.outcome,
            duration: entry.duration,
            timestamp: Utc::now(),
            details: entry.details,
        });
        Ok(id)
    }
}

/// Ledger backed by the host's Postgres database.
///
/// There is deliberately no UPDATE statement in this module; the only
/// mutation besides INSERT is the role-guarded delete below. The host
/// is expected to mirror the same restrictions at the database level.
pub struct PgAuditLedger {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgAuditLedger {
    pub fn new(database_url: &str, query_timeout: Duration) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .connect_lazy(database_url)
            .map_err(|error| EngineError::ConnectionError { error })?;

        Ok(Self {
            pool,
            query_timeout,
        })
    }

    pub fn from_pool(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    pub async fn delete(&self, id: AuditEntryId, role: LedgerRole) -> Result<(), EngineError> {
        if role != LedgerRole::Admin {
            return Err(EngineError::AuditDeleteForbidden);
        }
        sqlx::query("DELETE FROM lead_audit_log WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|error| EngineError::QueryError {
                command: "delete_audit_entry".to_owned(),
                error,
            })?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgAuditLedger {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntryId, EngineError> {
        let id = AuditEntryId::new();
        let sql = r#"
INSERT INTO lead_audit_log
    (id, lead_id, customer_id, operation, outcome, duration_ms, timestamp, details)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;
        let fut = sqlx::query(sql)
            .bind(id)
            .bind(entry.lead_id)
            .bind(entry.customer_id)
            .bind(entry.kind.as_str())
            .bind(&entry.outcome)
            .bind(entry.duration.as_millis() as i64)
            .bind(Utc::now())
            .bind(&entry.details)
            .execute(&self.pool);
        match timeout(self.query_timeout, fut).await {
            Ok(Ok(_)) => Ok(id),
            Ok(Err(error)) => Err(EngineError::QueryError {
                command: "append_audit_entry".to_owned(),
                error,
            }),
            Err(_) => Err(EngineError::QueryTimeout {
                command: "append_audit_entry".to_owned(),
                timeout_ms: self.query_timeout.as_millis() as u64,
            }),
        }
    }
}
