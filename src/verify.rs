// ABOUTME: Verifier - compares source and target row counts without modifying anything
// ABOUTME: Classifies each table as in-sync, drifting or diverged against a row threshold

use serde::Serialize;
use std::fmt;

use crate::endpoint::Connector;
use crate::error::{Result, SyncError};
use crate::inventory::{TableInventory, TableSpec};

/// How far a target table is from its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    InSync,
    Drifting,
    Diverged,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::InSync => write!(f, "in-sync"),
            Classification::Drifting => write!(f, "drifting"),
            Classification::Diverged => write!(f, "diverged"),
        }
    }
}

/// Classify a pair of counts.
///
/// `delta == 0` is in-sync, `0 < delta < threshold` drifting, and anything
/// else diverged. A negative delta (target ahead of source) is always
/// diverged.
pub fn classify(source_count: u64, target_count: u64, threshold: u64) -> Classification {
    if source_count == target_count {
        Classification::InSync
    } else if target_count > source_count {
        Classification::Diverged
    } else if source_count - target_count < threshold {
        Classification::Drifting
    } else {
        Classification::Diverged
    }
}

/// Count comparison for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub table: String,
    pub source_count: u64,
    pub target_count: u64,
    /// `source_count - target_count`
    pub delta: i64,
    pub classification: Classification,
    pub source_exists: bool,
    pub target_exists: bool,
}

impl VerificationResult {
    pub fn new(
        table: impl Into<String>,
        source_count: u64,
        target_count: u64,
        threshold: u64,
    ) -> Self {
        Self {
            table: table.into(),
            source_count,
            target_count,
            delta: source_count as i64 - target_count as i64,
            classification: classify(source_count, target_count, threshold),
            source_exists: true,
            target_exists: true,
        }
    }

    /// The source table is gone: nothing to compare against.
    pub fn missing_source(table: impl Into<String>, target_count: u64) -> Self {
        Self {
            table: table.into(),
            source_count: 0,
            target_count,
            delta: -(target_count as i64),
            classification: Classification::Diverged,
            source_exists: false,
            target_exists: true,
        }
    }

    pub fn is_in_sync(&self) -> bool {
        self.classification == Classification::InSync
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: source={} target={} delta={} [{}]",
            self.table, self.source_count, self.target_count, self.delta, self.classification
        )?;
        if !self.source_exists {
            write!(f, " (source table missing)")?;
        }
        if !self.target_exists {
            write!(f, " (target table missing)")?;
        }
        Ok(())
    }
}

/// Outcome of verifying a whole inventory.
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub results: Vec<VerificationResult>,
    /// Tables whose counts could not be read, with the error message
    pub errors: Vec<(String, String)>,
}

impl VerificationReport {
    pub fn count(&self, classification: Classification) -> usize {
        self.results
            .iter()
            .filter(|r| r.classification == classification)
            .count()
    }

    /// True when no table is diverged and every count could be read.
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty() && self.count(Classification::Diverged) == 0
    }

    pub fn log(&self) {
        for result in &self.results {
            match result.classification {
                Classification::InSync => tracing::info!("{}", result),
                Classification::Drifting | Classification::Diverged => {
                    tracing::warn!("{}", result)
                }
            }
        }
        for (table, error) in &self.errors {
            tracing::error!("{}: verification failed: {}", table, error);
        }
        tracing::info!(
            "Verification: {} in-sync, {} drifting, {} diverged, {} error(s)",
            self.count(Classification::InSync),
            self.count(Classification::Drifting),
            self.count(Classification::Diverged),
            self.errors.len()
        );
    }
}

/// Read-only comparison of source and target.
pub struct Verifier<'a> {
    source: &'a dyn Connector,
    target: &'a dyn Connector,
    threshold: u64,
}

impl<'a> Verifier<'a> {
    pub fn new(source: &'a dyn Connector, target: &'a dyn Connector, threshold: u64) -> Self {
        Self {
            source,
            target,
            threshold,
        }
    }

    /// Take fresh counts for one table.
    ///
    /// A missing target table counts as zero rows.
    pub async fn verify_table(&self, spec: &TableSpec) -> Result<VerificationResult> {
        let target_count = {
            let mut target = self.target.connect().await?;
            match target.count_rows(&spec.target_schema, &spec.name).await {
                Ok(count) => Some(count),
                Err(SyncError::MissingTable { .. }) => None,
                Err(e) => return Err(e),
            }
        };

        let source_count = {
            let mut source = self.source.connect().await?;
            match source.count_rows(&spec.source_schema, &spec.name).await {
                Ok(count) => Some(count),
                Err(SyncError::MissingTable { .. }) => None,
                Err(e) => return Err(e),
            }
        };

        let result = match (source_count, target_count) {
            (Some(source), Some(target)) => {
                VerificationResult::new(spec.target_name(), source, target, self.threshold)
            }
            (Some(source), None) => {
                let mut result = VerificationResult::new(spec.target_name(), source, 0, self.threshold);
                result.target_exists = false;
                result
            }
            (None, target) => {
                let mut result = VerificationResult::missing_source(spec.target_name(), target.unwrap_or(0));
                result.target_exists = target.is_some();
                result
            }
        };

        tracing::debug!("{}", result);
        Ok(result)
    }

    /// Verify every table. Per-table errors are collected, not propagated.
    pub async fn verify_all(&self, inventory: &TableInventory) -> VerificationReport {
        let mut report = VerificationReport::default();
        for spec in inventory {
            match self.verify_table(spec).await {
                Ok(result) => report.results.push(result),
                Err(e) => report.errors.push((spec.target_name(), e.to_string())),
            }
        }
        report
    }
}
