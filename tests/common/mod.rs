// ABOUTME: In-memory Connector/Session used by the integration tests
// ABOUTME: Supports fault injection: failed connects, failed or lost commits, poison rows, interrupts

#![allow(dead_code)]

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use quality_sync::endpoint::{Connector, ExtractRequest, LoadRequest, Session};
use quality_sync::error::{Result, SyncError};
use quality_sync::inventory::{TableInventory, TableSpec};
use quality_sync::load::ConflictPolicy;
use quality_sync::schema::ColumnDef;
use quality_sync::sync::{FullSyncConfirmer, FullSyncGrant, SyncOptions};
use quality_sync::value::{RowBatch, SqlValue};

pub const COLUMNS: [&str; 3] = ["id", "data_hora", "valor"];

#[derive(Debug, Clone, Default)]
pub struct MemTable {
    pub columns: Vec<String>,
    pub key: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl MemTable {
    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

#[derive(Default)]
pub struct Faults {
    /// 1-based connect calls that fail with a connection error
    pub fail_connect_calls: Vec<u32>,
    /// Fail this many upcoming loads before anything is committed
    pub fail_loads: u32,
    /// Commit this many upcoming loads, then report a failure anyway
    pub lost_acks: u32,
    /// Any load containing a row with this `id` fails before commit
    pub poison_id: Option<i64>,
    /// Every extract fails with a query error
    pub extract_query_error: bool,
    /// Every count fails with a connection error
    pub fail_counts: bool,
    /// Every connect waits forever, like an unreachable host without a timeout
    pub hang_connects: bool,
    /// Send on this channel after this many committed loads
    pub interrupt_after_loads: Option<(u32, broadcast::Sender<()>)>,
}

#[derive(Default)]
pub struct Counters {
    pub connects: u32,
    pub loads_attempted: u32,
    pub loads_committed: u32,
    pub truncates: u32,
    pub creates: u32,
    pub extracts: u32,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<(String, String), MemTable>,
    faults: Faults,
    counters: Counters,
}

/// A shared in-memory database; clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Arc::default(),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner)
    }

    pub fn create(&self, schema: &str, table: &str, key: &[&str], rows: Vec<Vec<SqlValue>>) {
        self.with(|inner| {
            inner.tables.insert(
                (schema.to_string(), table.to_string()),
                MemTable {
                    columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
                    key: key.iter().map(|k| k.to_string()).collect(),
                    rows,
                },
            );
        });
    }

    pub fn rows(&self, schema: &str, table: &str) -> Vec<Vec<SqlValue>> {
        self.with(|inner| {
            inner
                .tables
                .get(&(schema.to_string(), table.to_string()))
                .map(|t| t.rows.clone())
                .unwrap_or_default()
        })
    }

    /// Rows sorted by id, for comparing final states.
    pub fn sorted_rows(&self, schema: &str, table: &str) -> Vec<Vec<SqlValue>> {
        let mut rows = self.rows(schema, table);
        rows.sort_by(|a, b| compare_values(&a[0], &b[0]));
        rows
    }

    pub fn count(&self, schema: &str, table: &str) -> usize {
        self.rows(schema, table).len()
    }

    pub fn has_table(&self, schema: &str, table: &str) -> bool {
        self.with(|inner| inner.tables.contains_key(&(schema.to_string(), table.to_string())))
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<MemTable> {
        self.with(|inner| inner.tables.get(&(schema.to_string(), table.to_string())).cloned())
    }

    pub fn faults(&self, f: impl FnOnce(&mut Faults)) {
        self.with(|inner| f(&mut inner.faults));
    }

    pub fn counters<R>(&self, f: impl FnOnce(&Counters) -> R) -> R {
        self.with(|inner| f(&inner.counters))
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(MemoryConnector { db: self.clone() })
    }
}

/// Order values of the same kind; NULL sorts first.
pub fn compare_values(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a, b) {
        (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
        (SqlValue::Null, _) => Ordering::Less,
        (_, SqlValue::Null) => Ordering::Greater,
        (SqlValue::I64(x), SqlValue::I64(y)) => x.cmp(y),
        (SqlValue::I32(x), SqlValue::I32(y)) => x.cmp(y),
        (SqlValue::Text(x), SqlValue::Text(y)) => x.cmp(y),
        (SqlValue::Timestamp(x), SqlValue::Timestamp(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Reverse every run of rows that compare equal on the `order` columns.
fn reverse_ties(rows: &mut [Vec<SqlValue>], order: &[usize]) {
    let tied = |a: &[SqlValue], b: &[SqlValue]| {
        order
            .iter()
            .all(|&i| compare_values(&a[i], &b[i]) == Ordering::Equal)
    };
    let mut start = 0;
    while start < rows.len() {
        let mut end = start + 1;
        while end < rows.len() && tied(&rows[start], &rows[end]) {
            end += 1;
        }
        rows[start..end].reverse();
        start = end;
    }
}

pub struct MemoryConnector {
    db: MemoryDatabase,
}

#[async_trait]
impl Connector for MemoryConnector {
    fn endpoint(&self) -> String {
        format!("memory://{}", self.db.name)
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        let endpoint = self.endpoint();
        if self.db.with(|inner| inner.faults.hang_connects) {
            std::future::pending::<()>().await;
        }
        self.db.with(|inner| {
            inner.counters.connects += 1;
            let call = inner.counters.connects;
            if inner.faults.fail_connect_calls.contains(&call) {
                Err(SyncError::connection(endpoint, 1, "connection refused"))
            } else {
                Ok(())
            }
        })?;
        Ok(Box::new(MemorySession {
            db: self.db.clone(),
        }))
    }
}

pub struct MemorySession {
    db: MemoryDatabase,
}

fn key(schema: &str, table: &str) -> (String, String) {
    (schema.to_string(), table.to_string())
}

fn missing(schema: &str, table: &str) -> SyncError {
    SyncError::MissingTable {
        table: format!("{}.{}", schema, table),
    }
}

impl MemorySession {
    fn do_count(&self, schema: &str, table: &str) -> Result<u64> {
        self.db.with(|inner| {
            if inner.faults.fail_counts {
                return Err(SyncError::connection("memory", 1, "count timed out"));
            }
            inner
                .tables
                .get(&key(schema, table))
                .map(|t| t.rows.len() as u64)
                .ok_or_else(|| missing(schema, table))
        })
    }

    fn do_extract(&self, request: &ExtractRequest<'_>) -> Result<RowBatch> {
        self.db.with(|inner| {
            inner.counters.extracts += 1;
            let qualified = format!("{}.{}", request.schema, request.table);
            if inner.faults.extract_query_error {
                return Err(SyncError::query(qualified, "syntax error at or near \"FROM\""));
            }
            let table = inner
                .tables
                .get(&key(request.schema, request.table))
                .ok_or_else(|| missing(request.schema, request.table))?;

            let order: Vec<usize> = request
                .order_by
                .iter()
                .map(|c| table.position(c).ok_or_else(|| SyncError::query(&qualified, c.clone())))
                .collect::<Result<_>>()?;
            let projection: Vec<usize> = request
                .columns
                .iter()
                .map(|c| table.position(c).ok_or_else(|| SyncError::query(&qualified, c.clone())))
                .collect::<Result<_>>()?;

            let mut rows = table.rows.clone();
            rows.sort_by(|a, b| {
                order
                    .iter()
                    .map(|&i| compare_values(&a[i], &b[i]))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });

            // Rows tied on every ORDER BY column come back in a different
            // order on alternate pages, like a top-N sort over OFFSET + LIMIT.
            if (request.offset / request.limit.max(1) as u64) % 2 == 1 {
                reverse_ties(&mut rows, &order);
            }

            let page = rows
                .into_iter()
                .skip(request.offset as usize)
                .take(request.limit)
                .map(|row| projection.iter().map(|&i| row[i].clone()).collect())
                .collect();
            Ok(RowBatch::new(page))
        })
    }

    fn do_load(&self, request: &LoadRequest<'_>, batch: &RowBatch) -> Result<u64> {
        self.db.with(|inner| {
            inner.counters.loads_attempted += 1;
            let qualified = format!("{}.{}", request.schema, request.table);

            if inner.faults.fail_loads > 0 {
                inner.faults.fail_loads -= 1;
                return Err(SyncError::chunk_load(qualified, request.offset, "connection reset by peer"));
            }
            if let Some(poison) = inner.faults.poison_id {
                if batch.rows().iter().any(|row| row[0] == SqlValue::I64(poison)) {
                    return Err(SyncError::chunk_load(
                        qualified,
                        request.offset,
                        "invalid input syntax for type numeric",
                    ));
                }
            }

            let table = inner
                .tables
                .get_mut(&key(request.schema, request.table))
                .ok_or_else(|| missing(request.schema, request.table))?;

            // Apply to a copy so a failure leaves the table untouched
            let mut rows = table.rows.clone();
            let key_positions: Vec<usize> = request
                .conflict_key
                .iter()
                .filter_map(|k| table.position(k))
                .collect();
            let mut affected = 0u64;

            for incoming in batch.rows() {
                let existing = if key_positions.is_empty() {
                    None
                } else {
                    rows.iter()
                        .position(|row| key_positions.iter().all(|&i| row[i] == incoming[i]))
                };
                match (existing, request.policy) {
                    (None, _) => {
                        rows.push(incoming.clone());
                        affected += 1;
                    }
                    (Some(_), ConflictPolicy::SkipDuplicates) => {}
                    (Some(idx), ConflictPolicy::Overwrite) => {
                        rows[idx] = incoming.clone();
                        affected += 1;
                    }
                }
            }

            table.rows = rows;
            inner.counters.loads_committed += 1;

            if let Some((after, sender)) = &inner.faults.interrupt_after_loads {
                if inner.counters.loads_committed == *after {
                    let _ = sender.send(());
                }
            }

            if inner.faults.lost_acks > 0 {
                inner.faults.lost_acks -= 1;
                return Err(SyncError::chunk_load(
                    qualified,
                    request.offset,
                    "connection closed before commit acknowledgement",
                ));
            }
            Ok(affected)
        })
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        Ok(self.db.has_table(schema, table))
    }

    async fn count_rows(&mut self, schema: &str, table: &str) -> Result<u64> {
        self.do_count(schema, table)
    }

    async fn describe_columns(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<ColumnDef>> {
        let found = self
            .db
            .table(schema, table)
            .ok_or_else(|| missing(schema, table))?;
        columns
            .iter()
            .map(|c| {
                found
                    .position(c)
                    .map(|_| ColumnDef {
                        name: c.clone(),
                        data_type: "text".to_string(),
                        not_null: false,
                    })
                    .ok_or_else(|| SyncError::query(format!("{}.{}", schema, table), c.clone()))
            })
            .collect()
    }

    async fn create_table(
        &mut self,
        schema: &str,
        spec: &TableSpec,
        columns: &[ColumnDef],
    ) -> Result<()> {
        self.db.with(|inner| {
            inner.counters.creates += 1;
            inner
                .tables
                .entry(key(schema, &spec.name))
                .or_insert_with(|| MemTable {
                    columns: columns.iter().map(|c| c.name.clone()).collect(),
                    key: spec.conflict_key.clone(),
                    rows: Vec::new(),
                });
        });
        Ok(())
    }

    async fn extract(&mut self, request: &ExtractRequest<'_>) -> Result<RowBatch> {
        self.do_extract(request)
    }

    async fn truncate(&mut self, _grant: &FullSyncGrant, schema: &str, table: &str) -> Result<()> {
        self.db.with(|inner| {
            inner.counters.truncates += 1;
            let table = inner
                .tables
                .get_mut(&key(schema, table))
                .ok_or_else(|| missing(schema, table))?;
            table.rows.clear();
            Ok(())
        })
    }

    async fn load(&mut self, request: &LoadRequest<'_>, batch: &RowBatch) -> Result<u64> {
        self.do_load(request, batch)
    }
}

/// Measurement rows `id = start..start+n`, three rows per watermark value.
pub fn rows(start: i64, n: i64) -> Vec<Vec<SqlValue>> {
    (start..start + n)
        .map(|id| {
            vec![
                SqlValue::I64(id),
                SqlValue::I64(id / 3),
                SqlValue::Text(format!("v{}", id)),
            ]
        })
        .collect()
}

pub fn spec(name: &str, key: &[&str]) -> TableSpec {
    TableSpec {
        name: name.to_string(),
        source_schema: "qualitat".to_string(),
        target_schema: "public".to_string(),
        columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
        watermark_column: "data_hora".to_string(),
        conflict_key: key.iter().map(|k| k.to_string()).collect(),
        conflict_policy: None,
    }
}

pub fn inventory(specs: Vec<TableSpec>) -> TableInventory {
    TableInventory::new(specs).unwrap()
}

/// Options with small chunks and no delays.
pub fn options(chunk_size: usize) -> SyncOptions {
    SyncOptions {
        chunk_size,
        max_chunk_retries: 3,
        chunk_retry_delay: std::time::Duration::ZERO,
        chunk_pause: std::time::Duration::ZERO,
        conflict_policy: ConflictPolicy::SkipDuplicates,
        drift_threshold: 100,
    }
}

pub struct Approve;

impl FullSyncConfirmer for Approve {
    fn confirm(&self, _inventory: &TableInventory, _target: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

pub struct Decline;

impl FullSyncConfirmer for Decline {
    fn confirm(&self, _inventory: &TableInventory, _target: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
}

pub fn grant(inventory: &TableInventory) -> FullSyncGrant {
    FullSyncGrant::request(&Approve, inventory, "memory://target")
        .unwrap()
        .unwrap()
}
