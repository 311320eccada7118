// ABOUTME: Table inventory - the fixed, ordered list of tables to synchronize
// ABOUTME: Validates watermark and conflict key columns at load time so bad entries fail fast

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Result, SyncError};
use crate::load::ConflictPolicy;
use crate::utils::validate_postgres_identifier;

/// Columns shared by the four quality-measurement tables.
const MEASUREMENT_COLUMNS: [&str; 19] = [
    "client",
    "data_hora",
    "maquina",
    "fase",
    "id_referencia_client",
    "id_lot",
    "cavitat",
    "pieza",
    "element",
    "datum",
    "property",
    "actual",
    "nominal",
    "tolerancia_negativa",
    "tolerancia_positiva",
    "desviacio",
    "check_value",
    "created_at",
    "updated_at",
];

const MEASUREMENT_TABLES: [&str; 4] = [
    "mesures_gompcnou",
    "mesures_gompc_projectes",
    "mesureshoytom",
    "mesurestorsio",
];

fn default_source_schema() -> String {
    "public".to_string()
}

fn default_target_schema() -> String {
    "public".to_string()
}

/// Static description of one table to synchronize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name (identical on both sides)
    pub name: String,
    /// Schema the table is read from
    #[serde(default = "default_source_schema")]
    pub source_schema: String,
    /// Schema the table is written to
    #[serde(default = "default_target_schema")]
    pub target_schema: String,
    /// Columns copied, in order
    pub columns: Vec<String>,
    /// Monotonic column used to order pages
    pub watermark_column: String,
    /// Columns used for upsert de-duplication (may be empty)
    #[serde(default)]
    pub conflict_key: Vec<String>,
    /// Overrides the run's conflict policy for this table
    #[serde(default)]
    pub conflict_policy: Option<ConflictPolicy>,
}

impl TableSpec {
    /// Qualified source name for logs (`schema.table`).
    pub fn source_name(&self) -> String {
        format!("{}.{}", self.source_schema, self.name)
    }

    /// Qualified target name for logs (`schema.table`).
    pub fn target_name(&self) -> String {
        format!("{}.{}", self.target_schema, self.name)
    }

    /// Conflict policy for this table given the run default.
    pub fn effective_policy(&self, run_default: ConflictPolicy) -> ConflictPolicy {
        self.conflict_policy.unwrap_or(run_default)
    }

    /// Columns that give pages a total order: the watermark, then the
    /// conflict key. Without a key every other declared column breaks ties,
    /// so rows sharing a watermark value keep the same relative order on
    /// every page.
    pub fn order_by_columns(&self) -> Vec<String> {
        let tiebreak = if self.conflict_key.is_empty() {
            &self.columns
        } else {
            &self.conflict_key
        };
        let mut order = vec![self.watermark_column.clone()];
        order.extend(
            tiebreak
                .iter()
                .filter(|c| **c != self.watermark_column)
                .cloned(),
        );
        order
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| SyncError::Config(format!("table '{}': {}", self.name, msg));

        if self.name.trim().is_empty() {
            return Err(SyncError::Config("table name must not be empty".to_string()));
        }
        for ident in [&self.name, &self.source_schema, &self.target_schema] {
            validate_postgres_identifier(ident).map_err(|e| invalid(e.to_string()))?;
        }

        if self.columns.is_empty() {
            return Err(invalid("column list must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            validate_postgres_identifier(column).map_err(|e| invalid(e.to_string()))?;
            if !seen.insert(column.as_str()) {
                return Err(invalid(format!("column '{}' is declared twice", column)));
            }
        }

        if self.watermark_column.trim().is_empty() {
            return Err(invalid(
                "a watermark column is required for ordered pagination".to_string(),
            ));
        }
        if !seen.contains(self.watermark_column.as_str()) {
            return Err(invalid(format!(
                "watermark column '{}' is not in the column list",
                self.watermark_column
            )));
        }

        for key in &self.conflict_key {
            if !seen.contains(key.as_str()) {
                return Err(invalid(format!(
                    "conflict key column '{}' is not in the column list",
                    key
                )));
            }
        }

        if self.conflict_policy == Some(ConflictPolicy::Overwrite) && self.conflict_key.is_empty() {
            return Err(invalid(
                "overwrite policy requires a conflict key".to_string(),
            ));
        }

        Ok(())
    }
}

/// Ordered, validated list of tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInventory {
    tables: Vec<TableSpec>,
}

impl TableInventory {
    /// Build an inventory, validating every entry.
    pub fn new(tables: Vec<TableSpec>) -> Result<Self> {
        if tables.is_empty() {
            return Err(SyncError::Config(
                "table inventory must contain at least one table".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for table in &tables {
            table.validate()?;
            if !seen.insert((table.target_schema.clone(), table.name.clone())) {
                return Err(SyncError::Config(format!(
                    "table '{}' is listed more than once",
                    table.target_name()
                )));
            }
            if table.conflict_key.is_empty() {
                tracing::warn!(
                    "Table {} has no conflict key; rows re-sent after a lost commit acknowledgement cannot be de-duplicated",
                    table.target_name()
                );
            }
        }

        Ok(Self { tables })
    }

    /// The built-in quality-measurement inventory: `qualitat.*` → `public.*`.
    pub fn quality_measurements() -> Self {
        let columns: Vec<String> = MEASUREMENT_COLUMNS.iter().map(|c| c.to_string()).collect();
        let tables = MEASUREMENT_TABLES
            .iter()
            .map(|name| TableSpec {
                name: name.to_string(),
                source_schema: "qualitat".to_string(),
                target_schema: "public".to_string(),
                columns: columns.clone(),
                watermark_column: "data_hora".to_string(),
                conflict_key: Vec::new(),
                conflict_policy: None,
            })
            .collect();
        Self { tables }
    }

    /// Keep only the named tables, preserving inventory order.
    pub fn retain_named(self, names: &[String]) -> Result<Self> {
        for name in names {
            if !self.tables.iter().any(|t| &t.name == name) {
                return Err(SyncError::Config(format!(
                    "table '{}' is not in the inventory",
                    name
                )));
            }
        }
        let tables = self
            .tables
            .into_iter()
            .filter(|t| names.contains(&t.name))
            .collect();
        Ok(Self { tables })
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TableSpec> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl<'a> IntoIterator for &'a TableInventory {
    type Item = &'a TableSpec;
    type IntoIter = std::slice::Iter<'a, TableSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.iter()
    }
}
