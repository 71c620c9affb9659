use thiserror::Error;

/// Errors surfaced by the engine and its stores.
///
/// Most pipeline steps recover locally (a failed directory lookup
/// contributes no candidates, missing rule configuration degrades to
/// manual assignment). Only an audit append failure propagates to the
/// caller, since an un-recorded decision would break the ledger
/// guarantee.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },

    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },

    #[error("{command} query timed out after {timeout_ms}ms")]
    QueryTimeout { command: String, timeout_ms: u64 },

    #[error("failed to parse stored data: {0}")]
    DataParsingError(String),

    #[error("failed to append audit entry for lead {lead_id}: {source}")]
    AuditWrite {
        lead_id: crate::lead::LeadId,
        #[source]
        source: Box<EngineError>,
    },

    #[error("audit entries are immutable once written")]
    AuditImmutable,

    #[error("audit entry deletion requires an administrative caller")]
    AuditDeleteForbidden,
}
