// ABOUTME: Count probe - row counts and table existence checks on either endpoint
// ABOUTME: Used to pick the resume offset and to verify completion

use tokio_postgres::Client;

use crate::error::{Result, SyncError};
use crate::utils::quote_table;

/// Build the aggregate count query for a table.
pub fn build_count_query(schema: &str, table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_table(schema, table))
}

/// Count the rows of a table.
///
/// Returns [`SyncError::MissingTable`] if the table does not exist.
pub async fn count_rows(client: &Client, endpoint: &str, schema: &str, table: &str) -> Result<u64> {
    let qualified = format!("{}.{}", schema, table);
    let row = client
        .query_one(&build_count_query(schema, table), &[])
        .await
        .map_err(|e| SyncError::from_read(endpoint, &qualified, e))?;

    let count: i64 = row.get(0);
    Ok(count.max(0) as u64)
}

/// Check whether a table exists.
pub async fn table_exists(client: &Client, endpoint: &str, schema: &str, table: &str) -> Result<bool> {
    let row = client
        .query_one(
            "SELECT EXISTS (
                 SELECT 1 FROM information_schema.tables
                 WHERE table_schema = $1 AND table_name = $2
             )",
            &[&schema, &table],
        )
        .await
        .map_err(|e| SyncError::from_read(endpoint, &format!("{}.{}", schema, table), e))?;

    Ok(row.get(0))
}
