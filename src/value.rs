// ABOUTME: Owned SQL values and row batches moved between extraction and load
// ABOUTME: Decodes tokio_postgres rows by column type and binds values back with type checks

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::Row;
use uuid::Uuid;

/// A single column value read from the source.
///
/// Values are owned so a batch can outlive the source connection that
/// produced it: the extractor's connection is closed before the loader opens
/// its own.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Decode column `idx` of a row according to its PostgreSQL type.
    ///
    /// Returns an error message naming the column for types the engine does
    /// not carry.
    pub fn from_row(row: &Row, idx: usize) -> Result<SqlValue, String> {
        let column = &row.columns()[idx];
        let ty = column.type_();

        fn wrap<T>(value: Result<Option<T>, tokio_postgres::Error>, f: fn(T) -> SqlValue) -> Result<SqlValue, String> {
            value
                .map(|v| v.map_or(SqlValue::Null, f))
                .map_err(|e| e.to_string())
        }

        match *ty {
            Type::BOOL => wrap(row.try_get(idx), SqlValue::Bool),
            Type::INT2 => wrap(row.try_get(idx), SqlValue::I16),
            Type::INT4 => wrap(row.try_get(idx), SqlValue::I32),
            Type::INT8 => wrap(row.try_get(idx), SqlValue::I64),
            Type::FLOAT4 => wrap(row.try_get(idx), SqlValue::F32),
            Type::FLOAT8 => wrap(row.try_get(idx), SqlValue::F64),
            Type::NUMERIC => wrap(row.try_get(idx), SqlValue::Decimal),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                wrap(row.try_get(idx), SqlValue::Text)
            }
            Type::BYTEA => wrap(row.try_get(idx), SqlValue::Bytes),
            Type::UUID => wrap(row.try_get(idx), SqlValue::Uuid),
            Type::JSON | Type::JSONB => wrap(row.try_get(idx), SqlValue::Json),
            Type::TIMESTAMP => wrap(row.try_get(idx), SqlValue::Timestamp),
            Type::TIMESTAMPTZ => wrap(row.try_get(idx), SqlValue::TimestampTz),
            Type::DATE => wrap(row.try_get(idx), SqlValue::Date),
            Type::TIME => wrap(row.try_get(idx), SqlValue::Time),
            _ => Err(format!(
                "column \"{}\" has unsupported type {}",
                column.name(),
                ty.name()
            )),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        // Delegate to the checked variant so a type mismatch between source
        // and target columns is reported instead of writing garbage bytes.
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql_checked(ty, out),
            SqlValue::I16(v) => v.to_sql_checked(ty, out),
            SqlValue::I32(v) => v.to_sql_checked(ty, out),
            SqlValue::I64(v) => v.to_sql_checked(ty, out),
            SqlValue::F32(v) => v.to_sql_checked(ty, out),
            SqlValue::F64(v) => v.to_sql_checked(ty, out),
            SqlValue::Decimal(v) => v.to_sql_checked(ty, out),
            SqlValue::Text(v) => v.to_sql_checked(ty, out),
            SqlValue::Bytes(v) => v.to_sql_checked(ty, out),
            SqlValue::Uuid(v) => v.to_sql_checked(ty, out),
            SqlValue::Json(v) => v.to_sql_checked(ty, out),
            SqlValue::Timestamp(v) => v.to_sql_checked(ty, out),
            SqlValue::TimestampTz(v) => v.to_sql_checked(ty, out),
            SqlValue::Date(v) => v.to_sql_checked(ty, out),
            SqlValue::Time(v) => v.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// An ordered page of rows, each matching the table's declared column list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    rows: Vec<Vec<SqlValue>>,
}

impl RowBatch {
    pub fn new(rows: Vec<Vec<SqlValue>>) -> Self {
        Self { rows }
    }

    /// Decode every row of a query result.
    pub fn from_pg_rows(rows: &[Row]) -> Result<Self, String> {
        let decoded = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| SqlValue::from_row(row, idx))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows: decoded })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }
}
