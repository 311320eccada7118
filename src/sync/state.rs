// ABOUTME: Per-table sync state - mode, counts, resume offset, status and phase
// ABOUTME: The offset only moves forward and only after a chunk has been committed

use std::fmt;
use std::time::Duration;

use crate::error::SyncError;
use crate::sync::gate::FullSyncGrant;
use crate::verify::VerificationResult;

/// How a run treats existing target rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// Keep existing rows and copy from `offset = target count`
    Incremental,
    /// Truncate the target, then copy everything
    Full(FullSyncGrant),
}

impl SyncMode {
    pub fn is_full(&self) -> bool {
        matches!(self, SyncMode::Full(_))
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Incremental => write!(f, "incremental"),
            SyncMode::Full(_) => write!(f, "full"),
        }
    }
}

/// Outcome of one table within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// The source table does not exist
    Skipped,
    /// The operator stopped the run
    Interrupted,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStatus::Pending => "pending",
            TableStatus::InProgress => "in progress",
            TableStatus::Completed => "completed",
            TableStatus::Failed => "failed",
            TableStatus::Skipped => "skipped",
            TableStatus::Interrupted => "interrupted",
        };
        write!(f, "{}", s)
    }
}

/// Where a table is in the copy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Counting,
    Extracting,
    Loading,
    Verifying,
    Failed,
    Done,
}

impl SyncPhase {
    /// Allowed transitions of the copy loop.
    pub fn can_advance_to(self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        match (self, next) {
            (_, Failed) => !matches!(self, Done | Failed),
            (Idle, Counting) => true,
            // Counting straight to Done: empty source in incremental mode
            (Counting, Extracting) | (Counting, Done) => true,
            (Extracting, Loading) | (Extracting, Verifying) => true,
            (Loading, Extracting) => true,
            (Verifying, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Progress of one table in one run.
#[derive(Debug, Clone)]
pub struct SyncState {
    /// Qualified target name
    pub table: String,
    pub mode: SyncMode,
    pub source_count: u64,
    pub target_count_at_start: Option<u64>,
    /// Rows already durably in the target under this mode
    pub offset: u64,
    pub chunk_size: usize,
    pub status: TableStatus,
    pub phase: SyncPhase,
    pub last_error: Option<String>,
    /// Rows actually written (skipped duplicates excluded)
    pub rows_inserted: u64,
    pub chunks_committed: u64,
    /// Retries used over the whole table
    pub retries: u32,
    pub truncated: bool,
    pub verification: Option<VerificationResult>,
    pub elapsed: Duration,
}

impl SyncState {
    pub fn new(table: impl Into<String>, mode: SyncMode, chunk_size: usize) -> Self {
        Self {
            table: table.into(),
            mode,
            source_count: 0,
            target_count_at_start: None,
            offset: 0,
            chunk_size,
            status: TableStatus::Pending,
            phase: SyncPhase::Idle,
            last_error: None,
            rows_inserted: 0,
            chunks_committed: 0,
            retries: 0,
            truncated: false,
            verification: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Move to `next`, logging (and ignoring) transitions the loop never makes.
    pub fn advance(&mut self, next: SyncPhase) {
        if self.phase.can_advance_to(next) {
            tracing::trace!("{}: {} -> {}", self.table, self.phase, next);
            self.phase = next;
        } else {
            tracing::error!(
                "{}: invalid phase transition {} -> {}",
                self.table,
                self.phase,
                next
            );
        }
    }

    /// Record a committed chunk of `batch_len` rows.
    pub fn commit_chunk(&mut self, batch_len: usize, inserted: u64) {
        self.offset += batch_len as u64;
        self.rows_inserted += inserted;
        self.chunks_committed += 1;
    }

    pub fn fail(&mut self, error: &SyncError) {
        self.advance(SyncPhase::Failed);
        self.status = TableStatus::Failed;
        self.last_error = Some(error.to_string());
    }

    /// Share of the source already copied, 0-100.
    pub fn percent_complete(&self) -> f64 {
        if self.source_count == 0 {
            return 100.0;
        }
        (self.offset as f64 / self.source_count as f64 * 100.0).min(100.0)
    }
}
