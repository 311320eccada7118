// ABOUTME: PostgreSQL sessions - one connection per session, closed when the session drops
// ABOUTME: Routes every session operation to the probe, extract, load and schema modules

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::endpoint::{Connector, ExtractRequest, LoadRequest, Session};
use crate::error::Result;
use crate::extract::BatchExtractor;
use crate::inventory::TableSpec;
use crate::load::BatchLoader;
use crate::postgres::connection::{connect_with_retry, PgConnection};
use crate::probe;
use crate::schema::{self, ColumnDef};
use crate::sync::gate::FullSyncGrant;
use crate::value::RowBatch;

/// Opens PostgreSQL sessions for one configured endpoint.
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: ConnectionConfig,
}

impl PgConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for PgConnector {
    fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        let connection = connect_with_retry(&self.config).await?;
        Ok(Box::new(PgSession {
            connection,
            endpoint: self.config.endpoint(),
        }))
    }
}

pub struct PgSession {
    connection: PgConnection,
    endpoint: String,
}

#[async_trait]
impl Session for PgSession {
    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        probe::table_exists(self.connection.client(), &self.endpoint, schema, table).await
    }

    async fn count_rows(&mut self, schema: &str, table: &str) -> Result<u64> {
        probe::count_rows(self.connection.client(), &self.endpoint, schema, table).await
    }

    async fn describe_columns(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<ColumnDef>> {
        schema::describe_columns(self.connection.client(), &self.endpoint, schema, table, columns)
            .await
    }

    async fn create_table(
        &mut self,
        schema: &str,
        spec: &TableSpec,
        columns: &[ColumnDef],
    ) -> Result<()> {
        schema::create_table(self.connection.client(), &self.endpoint, schema, spec, columns).await
    }

    async fn extract(&mut self, request: &ExtractRequest<'_>) -> Result<RowBatch> {
        BatchExtractor::new(self.connection.client(), &self.endpoint)
            .extract(request)
            .await
    }

    async fn truncate(&mut self, _grant: &FullSyncGrant, schema: &str, table: &str) -> Result<()> {
        tracing::info!("Truncating {}.{}", schema, table);
        schema::truncate(self.connection.client(), &self.endpoint, schema, table).await
    }

    async fn load(&mut self, request: &LoadRequest<'_>, batch: &RowBatch) -> Result<u64> {
        BatchLoader::new(self.connection.client_mut())
            .load(request, batch)
            .await
    }
}
