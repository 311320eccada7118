// ABOUTME: Target schema preparation - column type discovery, table creation and truncation
// ABOUTME: Column types are copied from the source catalog so the target matches its shape

use tokio_postgres::Client;

use crate::error::{Result, SyncError};
use crate::inventory::TableSpec;
use crate::utils::{quote_column_list, quote_ident, quote_table};

/// Type definition of one column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Full type as rendered by `format_type`, e.g. `numeric(12,4)`
    pub data_type: String,
    pub not_null: bool,
}

/// Read the definitions of `columns` from the catalog, in the given order.
///
/// Fails with a query error naming the first declared column the table does
/// not have.
pub async fn describe_columns(
    client: &Client,
    endpoint: &str,
    schema: &str,
    table: &str,
    columns: &[String],
) -> Result<Vec<ColumnDef>> {
    let qualified = format!("{}.{}", schema, table);
    let rows = client
        .query(
            "SELECT a.attname, format_type(a.atttypid, a.atttypmod), a.attnotnull
             FROM pg_attribute a
             JOIN pg_class c ON c.oid = a.attrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = $1 AND c.relname = $2
               AND a.attnum > 0 AND NOT a.attisdropped
             ORDER BY a.attnum",
            &[&schema, &table],
        )
        .await
        .map_err(|e| SyncError::from_read(endpoint, &qualified, e))?;

    let found: Vec<ColumnDef> = rows
        .iter()
        .map(|row| ColumnDef {
            name: row.get(0),
            data_type: row.get(1),
            not_null: row.get(2),
        })
        .collect();

    if found.is_empty() {
        return Err(SyncError::MissingTable { table: qualified });
    }

    select_declared(&qualified, found, columns)
}

/// Pick the declared columns out of a catalog listing, in declared order.
fn select_declared(table: &str, found: Vec<ColumnDef>, columns: &[String]) -> Result<Vec<ColumnDef>> {
    columns
        .iter()
        .map(|name| {
            found
                .iter()
                .find(|def| &def.name == name)
                .cloned()
                .ok_or_else(|| SyncError::query(table, format!("column \"{}\" does not exist", name)))
        })
        .collect()
}

/// Build the statements that create a target table shaped like the source.
///
/// The conflict key becomes the primary key so `ON CONFLICT` has a unique
/// index to target, and the watermark column gets an index.
pub fn build_create_table(schema: &str, spec: &TableSpec, columns: &[ColumnDef]) -> Vec<String> {
    let mut definitions: Vec<String> = columns
        .iter()
        .map(|col| {
            let not_null = if col.not_null || spec.conflict_key.contains(&col.name) {
                " NOT NULL"
            } else {
                ""
            };
            format!("{} {}{}", quote_ident(&col.name), col.data_type, not_null)
        })
        .collect();

    if !spec.conflict_key.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", quote_column_list(&spec.conflict_key)));
    }

    let index_name = format!("{}_{}_idx", spec.name, spec.watermark_column);

    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)),
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_table(schema, &spec.name),
            definitions.join(", ")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&index_name),
            quote_table(schema, &spec.name),
            quote_ident(&spec.watermark_column)
        ),
    ]
}

/// Create the target table (and its schema) when missing.
pub async fn create_table(
    client: &Client,
    endpoint: &str,
    schema: &str,
    spec: &TableSpec,
    columns: &[ColumnDef],
) -> Result<()> {
    let qualified = format!("{}.{}", schema, spec.name);
    for statement in build_create_table(schema, spec, columns) {
        tracing::debug!("{}", statement);
        client
            .batch_execute(&statement)
            .await
            .map_err(|e| SyncError::from_read(endpoint, &qualified, e))?;
    }
    tracing::info!("Created target table {}", qualified);
    Ok(())
}

/// `TRUNCATE` without `CASCADE`: a referencing table makes this fail instead
/// of silently emptying other tables.
pub fn build_truncate(schema: &str, table: &str) -> String {
    format!("TRUNCATE TABLE {} RESTART IDENTITY", quote_table(schema, table))
}

pub async fn truncate(client: &Client, endpoint: &str, schema: &str, table: &str) -> Result<()> {
    client
        .batch_execute(&build_truncate(schema, table))
        .await
        .map_err(|e| SyncError::from_read(endpoint, &format!("{}.{}", schema, table), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, not_null: bool) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            data_type: data_type.to_string(),
            not_null,
        }
    }

    fn spec(key: &[&str]) -> TableSpec {
        TableSpec {
            name: "mesuresqualitat".to_string(),
            source_schema: "public".to_string(),
            target_schema: "public".to_string(),
            columns: vec!["id".to_string(), "valor".to_string(), "created_at".to_string()],
            watermark_column: "created_at".to_string(),
            conflict_key: key.iter().map(|k| k.to_string()).collect(),
            conflict_policy: None,
        }
    }

    #[test]
    fn test_create_table_with_primary_key() {
        let columns = vec![
            col("id", "integer", false),
            col("valor", "numeric(12,4)", false),
            col("created_at", "timestamp without time zone", true),
        ];
        let statements = build_create_table("public", &spec(&["id"]), &columns);

        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "CREATE SCHEMA IF NOT EXISTS \"public\"");
        assert_eq!(
            statements[1],
            "CREATE TABLE IF NOT EXISTS \"public\".\"mesuresqualitat\" (\
             \"id\" integer NOT NULL, \"valor\" numeric(12,4), \
             \"created_at\" timestamp without time zone NOT NULL, PRIMARY KEY (\"id\"))"
        );
        assert_eq!(
            statements[2],
            "CREATE INDEX IF NOT EXISTS \"mesuresqualitat_created_at_idx\" \
             ON \"public\".\"mesuresqualitat\" (\"created_at\")"
        );
    }

    #[test]
    fn test_create_table_without_key() {
        let columns = vec![col("id", "integer", false), col("created_at", "date", false)];
        let statements = build_create_table("public", &spec(&[]), &columns);
        assert!(!statements[1].contains("PRIMARY KEY"));
        assert!(!statements[1].contains("NOT NULL"));
    }

    #[test]
    fn test_truncate_never_cascades() {
        let sql = build_truncate("public", "mesurestorsio");
        assert_eq!(sql, "TRUNCATE TABLE \"public\".\"mesurestorsio\" RESTART IDENTITY");
        assert!(!sql.contains("CASCADE"));
    }

    #[test]
    fn test_select_declared_keeps_declared_order() {
        let found = vec![col("a", "int", false), col("b", "text", false), col("c", "date", true)];
        let picked = select_declared(
            "public.t",
            found,
            &["c".to_string(), "a".to_string()],
        )
        .unwrap();
        assert_eq!(picked[0].name, "c");
        assert_eq!(picked[1].name, "a");
    }

    #[test]
    fn test_select_declared_reports_missing_column() {
        let found = vec![col("a", "int", false)];
        let err = select_declared("public.t", found, &["a".to_string(), "zz".to_string()]).unwrap_err();
        assert!(matches!(err, SyncError::Query { .. }));
        assert!(err.to_string().contains("zz"));
    }
}
