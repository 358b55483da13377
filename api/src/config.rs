use std::str::FromStr;

use tally_core::prompt::{DomainRuleset, RulesetError};

use crate::llm::GeminiConfig;
use crate::pipeline::PipelineSettings;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MODEL: &str = "gemini-1.5-pro";
const DEFAULT_LLM_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
const DEFAULT_SCHEMA: &str = "analytics";
const DEFAULT_TIMEZONE: &str = "Asia/Seoul";
const DEFAULT_ANSWER_LANGUAGE: &str = "English";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key}={value} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Ruleset(#[from] RulesetError),
}

/// Everything the service reads from its environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub port: u16,
    pub llm: GeminiConfig,
    pub pipeline: PipelineSettings,
    pub ruleset: DomainRuleset,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let api_key = get("TALLY_LLM_API_KEY")
            .or_else(|| get("GEMINI_API_KEY"))
            .ok_or(ConfigError::Missing("TALLY_LLM_API_KEY"))?;

        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;
        let timeout_secs = parse_or(
            "TALLY_LLM_TIMEOUT_SECS",
            get("TALLY_LLM_TIMEOUT_SECS"),
            DEFAULT_LLM_TIMEOUT_SECS,
        )?;
        let max_output_tokens = parse_or(
            "TALLY_MAX_OUTPUT_TOKENS",
            get("TALLY_MAX_OUTPUT_TOKENS"),
            DEFAULT_MAX_OUTPUT_TOKENS,
        )?;
        let history_char_budget = get("TALLY_HISTORY_CHAR_BUDGET")
            .map(|raw| parse_value::<usize>("TALLY_HISTORY_CHAR_BUDGET", raw))
            .transpose()?;
        let query_guard = match get("TALLY_QUERY_GUARD") {
            None => true,
            Some(raw) => parse_flag("TALLY_QUERY_GUARD", raw)?,
        };

        let ruleset = DomainRuleset::new(
            &get("TALLY_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            &get("TALLY_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            &get("TALLY_ANSWER_LANGUAGE").unwrap_or_else(|| DEFAULT_ANSWER_LANGUAGE.to_string()),
        )?;

        Ok(Self {
            database_url,
            port,
            llm: GeminiConfig {
                api_key,
                base_url: get("TALLY_LLM_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
                timeout_secs,
            },
            pipeline: PipelineSettings {
                model: get("TALLY_LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                max_output_tokens,
                history_char_budget,
                query_guard,
            },
            ruleset,
        })
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => parse_value(key, raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value: raw,
    })
}

fn parse_flag(key: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected true or false".to_string(),
        }),
    }
}
