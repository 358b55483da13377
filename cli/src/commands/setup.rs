//! Provision the store-side objects generated queries depend on.
//!
//! Steps run one by one outside a transaction. An "already exists" failure
//! is logged and skipped; anything else stops the run.

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use tally_core::prompt::DomainRuleset;
use tally_core::provisioning::{SetupStep, is_conflict_sqlstate, provisioning_plan};

use crate::util::exit_error;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DdlError {
    pub sqlstate: Option<String>,
    pub message: String,
}

impl From<sqlx::Error> for DdlError {
    fn from(err: sqlx::Error) -> Self {
        let sqlstate = match &err {
            sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
            _ => None,
        };
        Self {
            sqlstate,
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait DdlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<(), DdlError>;
}

pub struct PgDdl {
    pool: PgPool,
}

#[async_trait]
impl DdlExecutor for PgDdl {
    async fn execute(&self, sql: &str) -> Result<(), DdlError> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub applied: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

#[derive(Debug, thiserror::Error)]
#[error("setup step '{step}' failed: {source}")]
pub struct SetupError {
    pub step: &'static str,
    #[source]
    pub source: DdlError,
    pub report: SetupReport,
}

pub async fn run_plan(
    executor: &dyn DdlExecutor,
    plan: &[SetupStep],
) -> Result<SetupReport, SetupError> {
    let mut report = SetupReport::default();

    for step in plan {
        match executor.execute(&step.sql).await {
            Ok(()) => {
                tracing::info!(step = step.description, "Setup step applied");
                report.applied.push(step.description);
            }
            Err(err) if err.sqlstate.as_deref().is_some_and(is_conflict_sqlstate) => {
                tracing::warn!(
                    step = step.description,
                    sqlstate = err.sqlstate.as_deref().unwrap_or_default(),
                    error = %err,
                    "Setup step skipped: object already exists"
                );
                report.skipped.push(step.description);
            }
            Err(err) => {
                tracing::error!(step = step.description, error = %err, "Setup step failed");
                return Err(SetupError {
                    step: step.description,
                    source: err,
                    report,
                });
            }
        }
    }

    Ok(report)
}

// Provisioning SQL reads only the schema; the zone and language are placeholders.
const RULESET_TIMEZONE: &str = "UTC";
const RULESET_LANGUAGE: &str = "English";

pub async fn run(schema: &str, replace: bool) -> i32 {
    let ruleset = match DomainRuleset::new(schema, RULESET_TIMEZONE, RULESET_LANGUAGE) {
        Ok(r) => r,
        Err(e) => exit_error(&e.to_string(), Some("Use a plain SQL identifier, e.g. analytics")),
    };

    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => exit_error(
            "DATABASE_URL must be set for setup",
            Some("Setup connects directly to the event store"),
        ),
    };

    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
    {
        Ok(p) => p,
        Err(e) => exit_error(&format!("Failed to connect to database: {e}"), None),
    };

    let plan = provisioning_plan(&ruleset, replace);
    match run_plan(&PgDdl { pool }, &plan).await {
        Ok(report) => {
            let output = json!({
                "schema": ruleset.schema,
                "applied": report.applied,
                "skipped": report.skipped,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
            0
        }
        Err(e) => {
            let hint = if e.report.applied.is_empty() && e.report.skipped.is_empty() {
                "No objects were created".to_string()
            } else {
                format!(
                    "Completed before the failure: {}",
                    [e.report.applied.as_slice(), e.report.skipped.as_slice()]
                        .concat()
                        .join(", ")
                )
            };
            exit_error(&e.to_string(), Some(&hint))
        }
    }
}
