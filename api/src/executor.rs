//! Query-execution capability backed by PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use tally_core::result::{ResultDocument, ResultDocumentError};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Document(#[from] ResultDocumentError),
}

impl ExecutionError {
    /// SQLSTATE of the underlying database error, if any.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            ExecutionError::Database(sqlx::Error::Database(db_err)) => {
                db_err.code().map(|code| code.into_owned())
            }
            _ => None,
        }
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run one query and collect every row into a single document.
    async fn execute(&self, query: &str) -> Result<ResultDocument, ExecutionError>;

    /// Cheap liveness probe for health checks.
    async fn ping(&self) -> bool;
}

/// Wrap a query so the store returns all rows as one JSON array text.
pub fn aggregate_rows_sql(query: &str) -> String {
    format!("SELECT COALESCE(json_agg(t), '[]'::json)::text FROM (\n{query}\n) AS t")
}

#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn execute(&self, query: &str) -> Result<ResultDocument, ExecutionError> {
        let sql = aggregate_rows_sql(query);

        let mut tx = self.pool.begin().await?;

        // Generated text runs as-is; the transaction keeps it from writing.
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;

        let document: String = sqlx::query_scalar(&sql).fetch_one(&mut *tx).await?;

        tx.rollback().await?;

        Ok(ResultDocument::from_json(&document)?)
    }

    async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}
