//! One-time provisioning of the store-side objects generated queries rely on:
//! the forecast model, the function that applies it, and the currency helper.

use crate::prompt::{DomainRuleset, EVENT_DATE_FORMAT};

pub const HELPER_KRW_TO_USD: &str = "krw_to_usd";
pub const FORECAST_MODEL: &str = "revenue_forecast_model";
pub const FORECAST_FUNCTION: &str = "revenue_forecast";

/// Fixed conversion rate used by the currency helper.
pub const KRW_PER_USD: f64 = 1400.0;

/// SQLSTATE codes meaning "the object already exists".
const CONFLICT_SQLSTATES: &[&str] = &["42P06", "42P07", "42710", "42723"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupStep {
    pub description: &'static str,
    pub sql: String,
}

/// True when a setup failure only says the object is already configured.
pub fn is_conflict_sqlstate(code: &str) -> bool {
    CONFLICT_SQLSTATES.contains(&code)
}

/// Ordered setup statements for the ruleset's schema.
///
/// Without `replace`, every statement is a plain `CREATE` so that a second
/// run reports conflicts instead of silently redefining objects.
pub fn provisioning_plan(ruleset: &DomainRuleset, replace: bool) -> Vec<SetupStep> {
    let schema = &ruleset.schema;
    let events = &ruleset.events_table;
    let model = &ruleset.forecast.model;
    let function = &ruleset.forecast.function;
    let create_function = if replace {
        "CREATE OR REPLACE FUNCTION"
    } else {
        "CREATE FUNCTION"
    };

    let mut steps = Vec::with_capacity(4);

    if replace {
        steps.push(SetupStep {
            description: "Drop previous forecast model",
            sql: format!("DROP TABLE IF EXISTS {model}"),
        });
    }

    steps.push(SetupStep {
        description: "Train revenue forecast model",
        sql: format!(
            r#"CREATE TABLE {model} AS
WITH daily AS (
    SELECT
        to_date(event_date, '{EVENT_DATE_FORMAT}') AS event_date_dt,
        SUM((ecommerce->>'purchase_revenue')::numeric)::double precision AS daily_revenue
    FROM {events}
    WHERE event_name = 'purchase'
    GROUP BY 1
),
origin AS (
    SELECT min(event_date_dt) AS origin_date FROM daily
)
SELECT
    origin.origin_date,
    max(daily.event_date_dt) AS last_observed_date,
    regr_slope(daily.daily_revenue, (daily.event_date_dt - origin.origin_date)::double precision) AS slope,
    regr_intercept(daily.daily_revenue, (daily.event_date_dt - origin.origin_date)::double precision) AS intercept,
    count(*) AS training_days,
    now() AS trained_at
FROM daily
CROSS JOIN origin
GROUP BY origin.origin_date"#
        ),
    });

    steps.push(SetupStep {
        description: "Create forecast function",
        sql: format!(
            r#"{create_function} {function}(horizon integer)
RETURNS TABLE (forecast_date date, forecast_value double precision)
LANGUAGE sql
STABLE
AS $$
    SELECT
        (m.last_observed_date + step)::date,
        GREATEST(m.intercept + m.slope * ((m.last_observed_date + step) - m.origin_date), 0)
    FROM {model} AS m
    CROSS JOIN generate_series(1, horizon) AS step
    ORDER BY 1
$$"#
        ),
    });

    steps.push(SetupStep {
        description: "Create currency helper function",
        sql: format!(
            r#"{create_function} {schema}.{HELPER_KRW_TO_USD}(krw_amount double precision)
RETURNS double precision
LANGUAGE sql
IMMUTABLE
AS $$
    SELECT krw_amount / NULLIF({KRW_PER_USD:.1}::double precision, 0)
$$"#
        ),
    });

    steps
}
