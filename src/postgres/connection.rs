// ABOUTME: Connection provider - opens PostgreSQL connections with timeout, TLS and keepalives
// ABOUTME: Retries failed connects a bounded number of times with a fixed delay

use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, Config, NoTls};

use crate::config::{ConnectionConfig, TlsMode};
use crate::error::{format_pg_error, Result, SyncError};
use crate::utils::{retry_with_backoff, Backoff};

/// A live connection.
///
/// The socket is driven by a detached task. Dropping a `PgConnection` drops
/// the client, which sends `Terminate` to the server; the task then sees the
/// connection close and ends on its own.
pub struct PgConnection {
    client: Client,
}

impl PgConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }
}

/// Translate the endpoint settings into a driver config.
pub fn pg_config(config: &ConnectionConfig) -> Config {
    let mut pg = Config::new();
    pg.host(&config.host)
        .port(config.port)
        .dbname(&config.database)
        .user(&config.user)
        .password(&config.password)
        .application_name("quality-sync")
        .connect_timeout(config.connect_timeout())
        .keepalives(true)
        .keepalives_idle(Duration::from_secs(60))
        .ssl_mode(match config.tls {
            TlsMode::Disable => SslMode::Disable,
            TlsMode::Prefer => SslMode::Prefer,
            TlsMode::Require => SslMode::Require,
        });
    pg
}

async fn try_connect(config: &ConnectionConfig) -> std::result::Result<PgConnection, String> {
    let pg = pg_config(config);
    let endpoint = config.endpoint();

    match config.tls {
        TlsMode::Disable => {
            let (client, connection) = pg.connect(NoTls).await.map_err(|e| format_pg_error(&e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!("Connection to {} closed with error: {}", endpoint, e);
                }
            });
            Ok(PgConnection { client })
        }
        TlsMode::Prefer | TlsMode::Require => {
            let connector = TlsConnector::builder()
                .build()
                .map_err(|e| format!("Failed to build TLS connector: {}", e))?;
            let (client, connection) = pg
                .connect(MakeTlsConnector::new(connector))
                .await
                .map_err(|e| format_pg_error(&e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!("Connection to {} closed with error: {}", endpoint, e);
                }
            });
            Ok(PgConnection { client })
        }
    }
}

/// Open a connection, making up to `max_retries` attempts in total with a
/// fixed delay between them.
///
/// The returned error records how many attempts were made.
pub async fn connect_with_retry(config: &ConnectionConfig) -> Result<PgConnection> {
    let endpoint = config.endpoint();
    tracing::debug!("Connecting to {}", endpoint);

    let connection = retry_with_backoff(
        || try_connect(config),
        config.max_retries,
        config.retry_delay(),
        Backoff::Fixed,
    )
    .await
    .map_err(|(message, attempts)| SyncError::connection(&endpoint, attempts, message))?;

    tracing::debug!("Connected to {}", endpoint);
    Ok(connection)
}
