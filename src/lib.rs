// ABOUTME: Library root for quality-sync
// ABOUTME: Chunked, resumable table synchronization between two PostgreSQL databases

pub mod config;
pub mod endpoint;
pub mod error;
pub mod extract;
pub mod inventory;
pub mod load;
pub mod monitor;
pub mod postgres;
pub mod probe;
pub mod report;
pub mod schema;
pub mod shutdown;
pub mod sync;
pub mod utils;
pub mod value;
pub mod verify;

pub use error::{Result, SyncError};
