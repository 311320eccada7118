// ABOUTME: Sync orchestrator - drives count, extract, load and verify for each table in order
// ABOUTME: Reconnects per chunk, retries transient failures and isolates failing tables

use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::config::SyncSettings;
use crate::endpoint::{Connector, ExtractRequest, LoadRequest};
use crate::error::{Result, SyncError};
use crate::inventory::{TableInventory, TableSpec};
use crate::load::ConflictPolicy;
use crate::report::RunSummary;
use crate::sync::state::{SyncMode, SyncPhase, SyncState, TableStatus};
use crate::verify::Verifier;

/// Tuning for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub chunk_size: usize,
    /// Attempts at one chunk (or at preparing a table), including the first
    pub max_chunk_retries: u32,
    pub chunk_retry_delay: Duration,
    pub chunk_pause: Duration,
    /// Default for tables without their own policy
    pub conflict_policy: ConflictPolicy,
    pub drift_threshold: u64,
}

impl SyncOptions {
    pub fn from_settings(settings: &SyncSettings, conflict_policy: ConflictPolicy) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            max_chunk_retries: settings.max_chunk_retries,
            chunk_retry_delay: Duration::from_secs(settings.chunk_retry_delay_secs),
            chunk_pause: Duration::from_millis(settings.chunk_pause_ms),
            conflict_policy,
            drift_threshold: settings.drift_threshold,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default(), ConflictPolicy::default())
    }
}

enum Prepared {
    SourceMissing,
    /// Empty source in incremental mode; the target is not touched
    NothingToCopy,
    Ready,
}

enum ChunkOutcome {
    /// The source returned no rows at the current offset
    Exhausted,
    Committed { rows: usize, inserted: u64 },
}

/// Copies every table of an inventory from source to target.
pub struct Orchestrator {
    source: Box<dyn Connector>,
    target: Box<dyn Connector>,
    options: SyncOptions,
    shutdown: Option<broadcast::Receiver<()>>,
    interrupted: bool,
}

impl Orchestrator {
    pub fn new(source: Box<dyn Connector>, target: Box<dyn Connector>, options: SyncOptions) -> Self {
        Self {
            source,
            target,
            options,
            shutdown: None,
            interrupted: false,
        }
    }

    /// Stop at the next chunk boundary once a message arrives on `shutdown`.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Sync every table in inventory order.
    ///
    /// A failing table does not stop the run. An interrupt does: the current
    /// table is marked interrupted and no further tables start.
    pub async fn run(&mut self, inventory: &TableInventory, mode: &SyncMode) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        tracing::info!(
            "Starting {} sync of {} table(s): {} -> {}",
            mode,
            inventory.len(),
            self.source.endpoint(),
            self.target.endpoint()
        );

        for spec in inventory {
            if self.check_interrupt() {
                break;
            }

            let state = self.sync_table(spec, mode).await;
            let stop = state.status == TableStatus::Interrupted;
            summary.tables.push(state);
            if stop {
                break;
            }
        }

        summary.elapsed = started.elapsed();
        summary.interrupted = self.interrupted;
        summary
    }

    /// Sync one table. Errors end up in the returned state, never as `Err`.
    pub async fn sync_table(&mut self, spec: &TableSpec, mode: &SyncMode) -> SyncState {
        let started = Instant::now();
        let mut state = SyncState::new(spec.target_name(), mode.clone(), self.options.chunk_size);
        state.status = TableStatus::InProgress;

        tracing::info!("Syncing {} -> {}", spec.source_name(), spec.target_name());

        match self.copy_table(spec, &mut state).await {
            Ok(()) => {}
            Err(SyncError::Interrupted) => {
                state.status = TableStatus::Interrupted;
                tracing::warn!(
                    "{}: interrupted at offset {} of {}",
                    state.table,
                    state.offset,
                    state.source_count
                );
            }
            Err(e) => {
                tracing::error!("{}: {}", state.table, e);
                state.fail(&e);
            }
        }

        state.elapsed = started.elapsed();
        state
    }

    async fn copy_table(&mut self, spec: &TableSpec, state: &mut SyncState) -> Result<()> {
        state.advance(SyncPhase::Counting);

        let mut failures = 0u32;
        let prepared = loop {
            match self.prepare(spec, state).await {
                Ok(prepared) => break prepared,
                Err(e) if e.is_retryable() && self.may_retry(failures) => {
                    failures += 1;
                    state.retries += 1;
                    tracing::warn!(
                        "{}: preparing table failed (attempt {}/{}): {}. Retrying in {:?}...",
                        state.table,
                        failures,
                        self.options.max_chunk_retries,
                        e,
                        self.options.chunk_retry_delay
                    );
                    tokio::time::sleep(self.options.chunk_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        match prepared {
            Prepared::SourceMissing => {
                tracing::warn!("Source table {} does not exist; skipping", spec.source_name());
                state.status = TableStatus::Skipped;
                state.advance(SyncPhase::Done);
                return Ok(());
            }
            Prepared::NothingToCopy => {
                tracing::info!("{}: source is empty, nothing to copy", state.table);
                state.status = TableStatus::Completed;
                state.advance(SyncPhase::Done);
                return Ok(());
            }
            Prepared::Ready => {}
        }

        state.advance(SyncPhase::Extracting);
        self.copy_chunks(spec, state).await?;

        state.advance(SyncPhase::Verifying);
        let verifier = Verifier::new(
            self.source.as_ref(),
            self.target.as_ref(),
            self.options.drift_threshold,
        );
        let verification = verifier.verify_table(spec).await?;
        tracing::info!("{}", verification);
        state.verification = Some(verification);

        state.status = TableStatus::Completed;
        state.advance(SyncPhase::Done);
        Ok(())
    }

    /// Count both sides, create the target table if needed, truncate in Full
    /// mode and pick the starting offset. Safe to repeat after a failure.
    async fn prepare(&self, spec: &TableSpec, state: &mut SyncState) -> Result<Prepared> {
        let mut source = self.source.connect().await?;
        if !source.table_exists(&spec.source_schema, &spec.name).await? {
            return Ok(Prepared::SourceMissing);
        }
        state.source_count = source.count_rows(&spec.source_schema, &spec.name).await?;

        if state.source_count == 0 && !state.mode.is_full() {
            return Ok(Prepared::NothingToCopy);
        }

        let mut target = self.target.connect().await?;
        if !target.table_exists(&spec.target_schema, &spec.name).await? {
            tracing::info!("Target table {} does not exist; creating it", spec.target_name());
            let columns = source
                .describe_columns(&spec.source_schema, &spec.name, &spec.columns)
                .await?;
            target.create_table(&spec.target_schema, spec, &columns).await?;
        }
        drop(source);

        let target_count = target.count_rows(&spec.target_schema, &spec.name).await?;
        if state.target_count_at_start.is_none() {
            state.target_count_at_start = Some(target_count);
        }

        match &state.mode {
            SyncMode::Full(grant) => {
                target.truncate(grant, &spec.target_schema, &spec.name).await?;
                state.truncated = true;
                state.offset = 0;
                tracing::info!(
                    "{}: truncated {} existing row(s); copying {} row(s)",
                    state.table,
                    target_count,
                    state.source_count
                );
            }
            SyncMode::Incremental => {
                state.offset = target_count;
                if target_count > state.source_count {
                    tracing::warn!(
                        "{}: target has {} rows but source only {}; nothing to copy",
                        state.table,
                        target_count,
                        state.source_count
                    );
                } else {
                    tracing::info!(
                        "{}: resuming at offset {} of {}",
                        state.table,
                        target_count,
                        state.source_count
                    );
                }
            }
        }
        Ok(Prepared::Ready)
    }

    /// Extract and load chunks until the source is exhausted.
    async fn copy_chunks(&mut self, spec: &TableSpec, state: &mut SyncState) -> Result<()> {
        let order_by = spec.order_by_columns();
        let policy = spec.effective_policy(self.options.conflict_policy);
        let mut consecutive_failures = 0u32;

        loop {
            if self.check_interrupt() {
                return Err(SyncError::Interrupted);
            }

            match self.copy_chunk(spec, &order_by, policy, state).await {
                Ok(ChunkOutcome::Exhausted) => return Ok(()),
                Ok(ChunkOutcome::Committed { rows, inserted }) => {
                    consecutive_failures = 0;
                    state.commit_chunk(rows, inserted);
                    state.advance(SyncPhase::Extracting);
                    tracing::info!(
                        "{}: copied {} / {} ({:.1}%)",
                        state.table,
                        state.offset,
                        state.source_count,
                        state.percent_complete()
                    );

                    if !self.options.chunk_pause.is_zero() {
                        tokio::time::sleep(self.options.chunk_pause).await;
                    }
                }
                Err(e) if e.is_retryable() && self.may_retry(consecutive_failures) => {
                    consecutive_failures += 1;
                    state.retries += 1;
                    tracing::warn!(
                        "{}: chunk at offset {} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        state.table,
                        state.offset,
                        consecutive_failures,
                        self.options.max_chunk_retries,
                        e,
                        self.options.chunk_retry_delay
                    );
                    if state.phase == SyncPhase::Loading {
                        state.advance(SyncPhase::Extracting);
                    }
                    tokio::time::sleep(self.options.chunk_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One chunk: fresh source session to extract, fresh target session to load.
    async fn copy_chunk(
        &self,
        spec: &TableSpec,
        order_by: &[String],
        policy: ConflictPolicy,
        state: &mut SyncState,
    ) -> Result<ChunkOutcome> {
        let batch = {
            let mut source = self.source.connect().await?;
            source
                .extract(&ExtractRequest {
                    schema: &spec.source_schema,
                    table: &spec.name,
                    columns: &spec.columns,
                    order_by,
                    offset: state.offset,
                    limit: self.options.chunk_size,
                })
                .await?
        };

        if batch.is_empty() {
            return Ok(ChunkOutcome::Exhausted);
        }

        state.advance(SyncPhase::Loading);
        let mut target = self.target.connect().await?;
        let inserted = target
            .load(
                &LoadRequest {
                    schema: &spec.target_schema,
                    table: &spec.name,
                    columns: &spec.columns,
                    conflict_key: &spec.conflict_key,
                    policy,
                    offset: state.offset,
                },
                &batch,
            )
            .await?;

        Ok(ChunkOutcome::Committed {
            rows: batch.len(),
            inserted,
        })
    }

    /// Whether another attempt fits in the budget after `failures` failed ones.
    fn may_retry(&self, failures: u32) -> bool {
        failures + 1 < self.options.max_chunk_retries
    }

    /// Whether an interrupt has been received. Only polled between chunks.
    fn check_interrupt(&mut self) -> bool {
        if self.interrupted {
            return true;
        }
        if let Some(shutdown) = self.shutdown.as_mut() {
            match shutdown.try_recv() {
                Ok(()) | Err(TryRecvError::Lagged(_)) => {
                    tracing::info!("Received shutdown signal");
                    self.interrupted = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {}
            }
        }
        self.interrupted
    }
}
