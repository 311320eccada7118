// ABOUTME: Run summary - per-table outcomes, totals, throughput and the process exit code
// ABOUTME: Logged at the end of every sync run

use std::time::Duration;

use crate::sync::state::{SyncState, TableStatus};
use crate::verify::Classification;

/// Exit code when every table completed and is in-sync or drifting.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code when a table failed or diverged, or Full sync was declined.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code after Ctrl+C (128 + SIGINT).
pub const EXIT_INTERRUPTED: u8 = 130;

/// Everything a sync run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tables: Vec<SyncState>,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl RunSummary {
    /// Tables that reached a terminal status.
    pub fn tables_processed(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| !matches!(t.status, TableStatus::Pending | TableStatus::InProgress))
            .count()
    }

    pub fn rows_copied(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_inserted).sum()
    }

    /// Rows per second over the whole run.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows_copied() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn with_status(&self, status: TableStatus) -> impl Iterator<Item = &SyncState> {
        self.tables.iter().filter(move |t| t.status == status)
    }

    pub fn diverged(&self) -> impl Iterator<Item = &SyncState> {
        self.tables.iter().filter(|t| {
            t.verification
                .as_ref()
                .is_some_and(|v| v.classification == Classification::Diverged)
        })
    }

    pub fn table(&self, name: &str) -> Option<&SyncState> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.with_status(TableStatus::Failed).next().is_some()
            || self.diverged().next().is_some()
        {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }

    pub fn log(&self) {
        tracing::info!("========================================");
        tracing::info!("Sync summary");
        for table in &self.tables {
            let verification = table
                .verification
                .as_ref()
                .map(|v| format!(", {} (delta {})", v.classification, v.delta))
                .unwrap_or_default();

            match table.status {
                TableStatus::Failed => tracing::error!(
                    "  {}: failed at offset {} after {} retries: {}",
                    table.table,
                    table.offset,
                    table.retries,
                    table.last_error.as_deref().unwrap_or("unknown error")
                ),
                TableStatus::Interrupted => tracing::warn!(
                    "  {}: interrupted at offset {} / {}",
                    table.table,
                    table.offset,
                    table.source_count
                ),
                TableStatus::Skipped => {
                    tracing::warn!("  {}: skipped (source table missing)", table.table)
                }
                _ => tracing::info!(
                    "  {}: {}, {} rows in {} chunk(s){}",
                    table.table,
                    table.status,
                    table.rows_inserted,
                    table.chunks_committed,
                    verification
                ),
            }
        }
        tracing::info!(
            "Tables processed: {}/{}, rows copied: {}, elapsed: {:.1}s, throughput: {:.0} rows/s",
            self.tables_processed(),
            self.tables.len(),
            self.rows_copied(),
            self.elapsed.as_secs_f64(),
            self.throughput()
        );
        if self.interrupted {
            tracing::warn!("Run interrupted; rerun to resume from the target's current row count");
        }
        tracing::info!("========================================");
    }
}
