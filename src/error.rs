// ABOUTME: Error taxonomy for the sync engine (connection, query, chunk load, config)
// ABOUTME: Classifies PostgreSQL errors by SQLSTATE into retryable and fatal kinds

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Errors raised by the synchronization engine.
///
/// Only [`SyncError::Connection`] and [`SyncError::ChunkLoad`] are transient;
/// the orchestrator retries them from the last committed offset.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or authentication failure while opening or using a connection
    #[error("Connection to {endpoint} failed after {attempts} attempt(s): {message}")]
    Connection {
        endpoint: String,
        attempts: u32,
        message: String,
    },

    /// Malformed query or missing column; a configuration bug, never retried
    #[error("Query failed on {table}: {message}")]
    Query { table: String, message: String },

    /// The table does not exist on the queried endpoint
    #[error("Table {table} does not exist")]
    MissingTable { table: String },

    /// A batch failed to commit; nothing from the chunk is visible in the target
    #[error("Chunk at offset {offset} of {table} failed to commit: {message}")]
    ChunkLoad {
        table: String,
        offset: u64,
        message: String,
    },

    /// Invalid configuration or inventory
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operator interrupted the run
    #[error("Sync interrupted")]
    Interrupted,
}

impl SyncError {
    pub fn connection(endpoint: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        SyncError::Connection {
            endpoint: endpoint.into(),
            attempts,
            message: message.into(),
        }
    }

    pub fn query(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Query {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn chunk_load(table: impl Into<String>, offset: u64, message: impl Into<String>) -> Self {
        SyncError::ChunkLoad {
            table: table.into(),
            offset,
            message: message.into(),
        }
    }

    /// Whether retrying after a reconnect can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connection { .. } | SyncError::ChunkLoad { .. }
        )
    }

    /// Classify an error raised while reading (count, exists, describe, extract).
    pub fn from_read(endpoint: &str, table: &str, err: tokio_postgres::Error) -> Self {
        match err.code() {
            None => SyncError::connection(endpoint, 1, format!("{}: {}", table, format_pg_error(&err))),
            Some(code) if *code == SqlState::UNDEFINED_TABLE => SyncError::MissingTable {
                table: table.to_string(),
            },
            Some(code) if is_connection_class(code) => {
                SyncError::connection(endpoint, 1, format!("{}: {}", table, format_pg_error(&err)))
            }
            Some(_) => SyncError::query(table, format_pg_error(&err)),
        }
    }

    /// Classify an error raised while writing a chunk.
    ///
    /// Syntax and undefined-object errors (class 42) are configuration bugs;
    /// everything else, including constraint violations and dropped
    /// connections, fails the chunk.
    pub fn from_write(table: &str, offset: u64, err: tokio_postgres::Error) -> Self {
        match err.code() {
            Some(code) if code.code().starts_with("42") => {
                if *code == SqlState::UNDEFINED_TABLE {
                    SyncError::MissingTable {
                        table: table.to_string(),
                    }
                } else {
                    SyncError::query(table, format_pg_error(&err))
                }
            }
            _ => SyncError::chunk_load(table, offset, format_pg_error(&err)),
        }
    }
}

/// SQLSTATE class 08 (connection exception) and 57P0x (operator intervention,
/// e.g. server shutdown) behave like a dropped connection.
fn is_connection_class(code: &SqlState) -> bool {
    let code = code.code();
    code.starts_with("08") || code.starts_with("57P0")
}

/// Render a PostgreSQL error with the server message when there is one.
///
/// `tokio_postgres::Error`'s `Display` prints only "db error" for server-side
/// errors, so the detail has to be pulled out of the `DbError`.
pub fn format_pg_error(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({}): {}", db.message(), db.code().code(), detail),
            None => format!("{} ({})", db.message(), db.code().code()),
        },
        None => err.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
