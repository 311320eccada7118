// ABOUTME: PostgreSQL implementation of the connector/session seam
// ABOUTME: Connection setup with TLS and retries, plus sessions backed by the query modules

pub mod connection;
pub mod session;

pub use connection::{connect_with_retry, PgConnection};
pub use session::{PgConnector, PgSession};
