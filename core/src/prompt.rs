//! Prompt composition for query synthesis and answer composition.
//!
//! Both composers are pure: the same ruleset, history and question always
//! produce the same text.

use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono_tz::Tz;
use regex::Regex;

use crate::conversation::ConversationHistory;
use crate::provisioning::{FORECAST_FUNCTION, FORECAST_MODEL, HELPER_KRW_TO_USD, KRW_PER_USD};
use crate::result::ResultDocument;

static SQL_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid"));

/// Format of the `event_date` column in the event store.
pub const EVENT_DATE_FORMAT: &str = "YYYYMMDD";

/// Opening line of the answer when the user asked for a chart.
pub const CHART_DATA_PREFIX: &str = "Here is the chart data you requested.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesetError {
    #[error("schema '{0}' is not a plain SQL identifier")]
    InvalidSchema(String),
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
    #[error("answer language must not be empty")]
    EmptyLanguage,
}

/// A pre-registered SQL function generated queries may call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperFunction {
    /// Call signature as it should appear in SQL, e.g. `analytics.krw_to_usd(amount)`
    pub signature: String,
    pub description: String,
}

/// The forecasting capability, identified by name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastCapability {
    /// Qualified name of the trained model
    pub model: String,
    /// Qualified set-returning function that applies the model
    pub function: String,
}

/// Static conventions interpolated into every query prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainRuleset {
    pub schema: String,
    pub events_table: String,
    pub timezone: Tz,
    pub helpers: Vec<HelperFunction>,
    pub forecast: ForecastCapability,
    pub answer_language: String,
}

impl DomainRuleset {
    /// Conventions for a GA4-style export loaded into `<schema>.events`.
    pub fn new(schema: &str, timezone: &str, answer_language: &str) -> Result<Self, RulesetError> {
        if !SQL_IDENTIFIER.is_match(schema) {
            return Err(RulesetError::InvalidSchema(schema.to_string()));
        }
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| RulesetError::UnknownTimezone(timezone.to_string()))?;
        let answer_language = answer_language.trim();
        if answer_language.is_empty() {
            return Err(RulesetError::EmptyLanguage);
        }

        Ok(Self {
            schema: schema.to_string(),
            events_table: format!("{schema}.events"),
            timezone,
            helpers: vec![HelperFunction {
                signature: format!("{schema}.{HELPER_KRW_TO_USD}(amount)"),
                description: format!(
                    "converts a Korean won (KRW) amount to US dollars (USD) at a fixed rate of 1 USD = {KRW_PER_USD} KRW."
                ),
            }],
            forecast: ForecastCapability {
                model: format!("{schema}.{FORECAST_MODEL}"),
                function: format!("{schema}.{FORECAST_FUNCTION}"),
            },
            answer_language: answer_language.to_string(),
        })
    }

    /// SQL expression for "today" in the configured timezone.
    pub fn current_date_expression(&self) -> String {
        format!("(now() AT TIME ZONE '{}')::date", self.timezone.name())
    }
}

/// Build the prompt that asks the model for exactly one SQL query.
pub fn compose_query_prompt(
    ruleset: &DomainRuleset,
    history: &ConversationHistory,
    question: &str,
) -> String {
    let mut prompt = String::with_capacity(4096);

    prompt.push_str("# Persona and core instructions\n");
    prompt.push_str(
        "You are an expert PostgreSQL analyst who answers questions about web analytics \
         event data (GA4 export schema). Analyse the user's question together with the \
         context of the previous conversation and write the single best SQL query that \
         answers it.\n\n",
    );

    prompt.push_str("# Previous conversation\n");
    prompt.push_str(
        "- Below is the conversation so far, oldest first. Use it to interpret the current question.\n",
    );
    prompt.push_str(
        "- When the user asks something like \"what about there?\", they most likely mean a \
         subject from earlier turns (a product, a period, a channel).\n",
    );
    prompt.push_str(&history.serialize());
    prompt.push_str("\n\n");

    prompt.push_str("# Available helper functions\n");
    for helper in &ruleset.helpers {
        let _ = writeln!(prompt, "- `{}`: {}", helper.signature, helper.description);
    }
    prompt.push('\n');

    prompt.push_str("# Chart requests\n");
    let _ = writeln!(
        prompt,
        "- If the user asks for a chart, graph or visualization, do not try to draw it. \
         Write the SQL that fetches the data needed to draw it; the final answer will start \
         with \"{CHART_DATA_PREFIX}\" and present that data."
    );
    prompt.push('\n');

    prompt.push_str("# Forecasting\n");
    let _ = writeln!(
        prompt,
        "- If the user asks for a prediction, forecast or outlook of future values, query \
         `SELECT * FROM {}(<days ahead>)`. It applies the pre-trained model `{}` and returns \
         the columns forecast_date and forecast_value.",
        ruleset.forecast.function, ruleset.forecast.model
    );
    prompt.push('\n');

    prompt.push_str("# Query conventions\n");
    let _ = writeln!(prompt, "- Read events from `{}`.", ruleset.events_table);
    let _ = writeln!(
        prompt,
        "- Compare dates with `to_date(event_date, '{EVENT_DATE_FORMAT}')`."
    );
    let _ = writeln!(
        prompt,
        "- Relative dates: compute periods such as \"last N days\" or \"last week\" from \
         `{}` so that they follow {} local time.",
        ruleset.current_date_expression(),
        ruleset.timezone.name()
    );
    prompt.push_str(
        "- Total revenue: the SUM of `(ecommerce->>'purchase_revenue')::numeric` over events \
         where `event_name = 'purchase'`.\n",
    );
    prompt.push_str("- Total users: `COUNT(DISTINCT user_pseudo_id)`.\n\n");

    prompt.push_str("# Output\n");
    prompt.push_str(
        "- Write exactly one PostgreSQL query that answers the question. Reply with the SQL \
         only: no explanation, no comments, no Markdown.\n\n",
    );

    prompt.push_str("# Current question\n");
    prompt.push_str(question);

    prompt
}

/// Build the prompt that turns the query result into the final answer.
pub fn compose_answer_prompt(
    ruleset: &DomainRuleset,
    history: &ConversationHistory,
    question: &str,
    document: &ResultDocument,
) -> String {
    let mut prompt = String::with_capacity(2048);

    let _ = write!(
        prompt,
        "Below are the user's question, the previous conversation and the result of the SQL \
         query (JSON). Using all of this context, write the most natural final answer in {}. \
         If the question asked for a chart, start with \"{CHART_DATA_PREFIX}\" and present the \
         data clearly. If the result is empty, say that no matching data was found.",
        ruleset.answer_language
    );

    prompt.push_str("\n\n# Previous conversation\n");
    prompt.push_str(&history.serialize());
    prompt.push_str("\n\n# Current question\n");
    prompt.push_str(question);
    prompt.push_str("\n\n# Query result (JSON)\n");
    prompt.push_str(&document.to_json());

    prompt
}
