// ABOUTME: Connector and Session traits - the seam between the orchestrator and a database
// ABOUTME: Sessions are short-lived and scoped; dropping one releases its connection

use async_trait::async_trait;

use crate::error::Result;
use crate::inventory::TableSpec;
use crate::load::ConflictPolicy;
use crate::schema::ColumnDef;
use crate::sync::gate::FullSyncGrant;
use crate::value::RowBatch;

/// Parameters for reading one page of a table.
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub columns: &'a [String],
    /// Watermark column first, then the columns that break ties
    pub order_by: &'a [String],
    /// Rows to skip
    pub offset: u64,
    /// Maximum rows to return
    pub limit: usize,
}

/// Parameters for writing one page into a table.
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub columns: &'a [String],
    pub conflict_key: &'a [String],
    pub policy: ConflictPolicy,
    /// Offset of the chunk in the source, for error reporting
    pub offset: u64,
}

/// Opens sessions against one database endpoint.
///
/// Implementations do not pool: every call opens a new connection, so a
/// retry after a failure always starts from a fresh one.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Endpoint description safe to log (no credentials).
    fn endpoint(&self) -> String;

    /// Open a session, retrying according to the endpoint's settings.
    async fn connect(&self) -> Result<Box<dyn Session>>;
}

/// A live connection to one endpoint.
///
/// The connection is released when the session is dropped, on every exit
/// path.
#[async_trait]
pub trait Session: Send {
    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool>;

    /// Exact row count. Fails with `MissingTable` when the table is absent.
    async fn count_rows(&mut self, schema: &str, table: &str) -> Result<u64>;

    /// Type definitions of the given columns, in the given order.
    async fn describe_columns(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<ColumnDef>>;

    /// Create the target table if it does not exist yet.
    async fn create_table(
        &mut self,
        schema: &str,
        spec: &TableSpec,
        columns: &[ColumnDef],
    ) -> Result<()>;

    /// Read one page ordered by the request's `order_by` columns.
    async fn extract(&mut self, request: &ExtractRequest<'_>) -> Result<RowBatch>;

    /// Remove every row from the table. Requires proof that the operator
    /// confirmed a Full sync.
    async fn truncate(&mut self, grant: &FullSyncGrant, schema: &str, table: &str) -> Result<()>;

    /// Write a page atomically. Returns the number of rows actually inserted
    /// or updated; skipped duplicates are not counted.
    async fn load(&mut self, request: &LoadRequest<'_>, batch: &RowBatch) -> Result<u64>;
}
