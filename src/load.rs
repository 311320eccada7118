// ABOUTME: Batch loader - writes one page into the target inside a single transaction
// ABOUTME: Uses INSERT ... ON CONFLICT DO NOTHING / DO UPDATE so re-sent rows are harmless

use serde::{Deserialize, Serialize};
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use crate::endpoint::LoadRequest;
use crate::error::{Result, SyncError};
use crate::utils::{quote_column_list, quote_ident, quote_table};
use crate::value::RowBatch;

/// PostgreSQL accepts at most 65535 bind parameters per statement.
const MAX_PARAMS_PER_STATEMENT: usize = 65_000;

/// What happens when a loaded row collides with an existing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// `ON CONFLICT DO NOTHING`: re-sending a row is a no-op
    #[default]
    SkipDuplicates,
    /// `ON CONFLICT (key) DO UPDATE`: existing rows take the newer values
    Overwrite,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::SkipDuplicates => write!(f, "skip-duplicates"),
            ConflictPolicy::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// Writes pages into the target database.
///
/// All statements for one page run in one transaction: either the whole page
/// is committed or none of it is. A page that would exceed the parameter
/// limit is split over several statements inside that transaction.
pub struct BatchLoader<'a> {
    client: &'a mut Client,
}

impl<'a> BatchLoader<'a> {
    /// Create a new BatchLoader for the given target connection.
    pub fn new(client: &'a mut Client) -> Self {
        Self { client }
    }

    /// Apply a page. Returns the number of rows inserted or updated.
    ///
    /// On any error the transaction is rolled back (by dropping it) and the
    /// error is returned as a chunk failure.
    pub async fn load(&mut self, request: &LoadRequest<'_>, batch: &RowBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let qualified = format!("{}.{}", request.schema, request.table);
        let write_err = |e| SyncError::from_write(&qualified, request.offset, e);

        let transaction = self.client.transaction().await.map_err(write_err)?;

        let rows_per_statement = std::cmp::max(1, MAX_PARAMS_PER_STATEMENT / request.columns.len().max(1));
        let mut affected = 0u64;

        for rows in batch.rows().chunks(rows_per_statement) {
            if let Some(bad) = rows.iter().find(|row| row.len() != request.columns.len()) {
                return Err(SyncError::query(
                    &qualified,
                    format!(
                        "row has {} values but {} columns are declared",
                        bad.len(),
                        request.columns.len()
                    ),
                ));
            }

            let query = build_insert_query(request, rows.len());
            let params: Vec<&(dyn ToSql + Sync)> = rows
                .iter()
                .flat_map(|row| row.iter().map(|v| v as &(dyn ToSql + Sync)))
                .collect();

            affected += transaction.execute(&query, &params).await.map_err(write_err)?;
        }

        transaction.commit().await.map_err(write_err)?;
        Ok(affected)
    }
}

/// Build a multi-row insert for the given conflict policy.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "public"."t" ("id", "valor", "data_hora")
/// VALUES ($1, $2, $3), ($4, $5, $6)
/// ON CONFLICT ("id") DO UPDATE SET
///   "valor" = EXCLUDED."valor", "data_hora" = EXCLUDED."data_hora"
/// ```
pub fn build_insert_query(request: &LoadRequest<'_>, num_rows: usize) -> String {
    let num_cols = request.columns.len();
    let value_rows: Vec<String> = (0..num_rows)
        .map(|row_idx| {
            let placeholders: Vec<String> = (0..num_cols)
                .map(|col_idx| format!("${}", row_idx * num_cols + col_idx + 1))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    let conflict_target = if request.conflict_key.is_empty() {
        String::new()
    } else {
        format!(" ({})", quote_column_list(request.conflict_key))
    };

    let action = match request.policy {
        ConflictPolicy::SkipDuplicates => "DO NOTHING".to_string(),
        ConflictPolicy::Overwrite => {
            let update_columns: Vec<String> = request
                .columns
                .iter()
                .filter(|c| !request.conflict_key.contains(c))
                .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
                .collect();

            if update_columns.is_empty() || request.conflict_key.is_empty() {
                // Nothing to update (or no key to match on)
                "DO NOTHING".to_string()
            } else {
                format!("DO UPDATE SET {}", update_columns.join(", "))
            }
        }
    };

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT{} {}",
        quote_table(request.schema, request.table),
        quote_column_list(request.columns),
        value_rows.join(", "),
        conflict_target,
        action
    )
}
