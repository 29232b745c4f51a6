//! SQL bridge contract.
//!
//! DB_QUERY frames execute verbatim against a backing relational database
//! and stream back as DB_RESULT. The concrete driver is an external
//! collaborator wired in at startup; the server only defines the seam and
//! a disabled default. Authorization is by possession of a valid client
//! certificate, per the protocol's trust model.

use async_trait::async_trait;
use kaza_proto::Value;

/// Errors from the SQL bridge. Per the error policy, a failed query is
/// logged and the client receives no reply.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// No database is configured for this deployment.
    #[error("database support is not configured")]
    Disabled,

    /// The backing database rejected the query.
    #[error("query failed: {0}")]
    Query(String),
}

/// A result set shaped for the DB_RESULT frame.
#[derive(Debug, Clone, Default)]
pub struct DbRows {
    /// Column names in result order.
    pub columns: Vec<String>,
    /// Row-major tagged values; every row has `columns.len()` cells.
    pub rows: Vec<Vec<Value>>,
}

/// Contract for the relational database collaborator.
#[async_trait]
pub trait SqlBridge: Send + Sync + 'static {
    /// Execute `sql` verbatim and return the full result set.
    async fn query(&self, sql: &str) -> Result<DbRows, DbError>;
}

/// Default bridge when `database/driver` is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSqlBridge;

#[async_trait]
impl SqlBridge for DisabledSqlBridge {
    async fn query(&self, _sql: &str) -> Result<DbRows, DbError> {
        Err(DbError::Disabled)
    }
}
