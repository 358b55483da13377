//! The translate → execute → summarize pipeline behind `POST /v1/ask`.
//!
//! One invocation makes exactly three remote calls in sequence: query
//! synthesis, query execution, answer composition. Any failure ends the
//! invocation; nothing is retried here.

use std::sync::Arc;
use std::time::Instant;

use tally_core::conversation::ConversationHistory;
use tally_core::error::PipelineError;
use tally_core::guard::{check_read_only, extract_query};
use tally_core::prompt::{DomainRuleset, compose_answer_prompt, compose_query_prompt};
use tally_core::result::ResultDocument;

use crate::executor::{ExecutionError, QueryExecutor};
use crate::llm::{GenerationRequest, TextGenerator};

/// Sampling temperature for query synthesis.
pub const QUERY_TEMPERATURE: f32 = 0.0;
/// Sampling temperature for the final answer.
pub const ANSWER_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Model identifier passed to the text-generation capability
    pub model: String,
    pub max_output_tokens: u32,
    /// Character budget for the history embedded in prompts (None = all turns)
    pub history_char_budget: Option<usize>,
    /// Reject anything but a single SELECT/WITH statement before execution
    pub query_guard: bool,
}

/// Result of one successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer: String,
    pub query: String,
    pub document: ResultDocument,
}

#[derive(Clone)]
pub struct Pipeline {
    generator: Arc<dyn TextGenerator>,
    executor: Arc<dyn QueryExecutor>,
    ruleset: DomainRuleset,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        executor: Arc<dyn QueryExecutor>,
        ruleset: DomainRuleset,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            generator,
            executor,
            ruleset,
            settings,
        }
    }

    pub fn executor(&self) -> &Arc<dyn QueryExecutor> {
        &self.executor
    }

    /// Answer one question in the context of `history`.
    pub async fn ask(
        &self,
        question: &str,
        history: &ConversationHistory,
    ) -> Result<Answer, PipelineError> {
        let started = Instant::now();
        let history = history.within_budget(self.settings.history_char_budget);

        let prompt = compose_query_prompt(&self.ruleset, &history, question);
        let query = self.synthesize_query(&prompt).await?;
        let document = self.execute(&query).await?;
        let answer = self.compose_answer(question, &history, &document).await?;

        tracing::info!(
            history_turns = history.len(),
            row_count = document.row_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Question answered"
        );

        Ok(Answer {
            answer,
            query,
            document,
        })
    }

    /// Ask the model for one query at temperature 0.0 and take the first candidate.
    pub async fn synthesize_query(&self, prompt: &str) -> Result<String, PipelineError> {
        let candidate = self.generate_first(prompt, QUERY_TEMPERATURE).await?;
        let query = extract_query(&candidate).ok_or_else(|| {
            PipelineError::Synthesis("model returned an empty query".to_string())
        })?;

        tracing::debug!(generated_query = %query, "Query synthesized");
        Ok(query)
    }

    /// Run the generated query and collect its rows into one document.
    pub async fn execute(&self, query: &str) -> Result<ResultDocument, PipelineError> {
        if self.settings.query_guard {
            check_read_only(query).map_err(|rejection| {
                tracing::warn!(generated_query = %query, %rejection, "Generated query rejected");
                PipelineError::Execution(rejection.to_string())
            })?;
        }

        let started = Instant::now();
        match self.executor.execute(query).await {
            Ok(document) => {
                tracing::debug!(
                    row_count = document.row_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Generated query executed"
                );
                Ok(document)
            }
            Err(ExecutionError::Document(err)) => {
                tracing::error!(
                    generated_query = %query,
                    error = %err,
                    "Store returned a malformed row document"
                );
                Err(PipelineError::Internal(err.to_string()))
            }
            Err(err) => {
                tracing::warn!(
                    generated_query = %query,
                    sqlstate = err.sqlstate().as_deref().unwrap_or("-"),
                    error = %err,
                    "Generated query failed"
                );
                Err(PipelineError::Execution(err.to_string()))
            }
        }
    }

    /// Turn the result document into a natural-language answer at temperature 0.2.
    pub async fn compose_answer(
        &self,
        question: &str,
        history: &ConversationHistory,
        document: &ResultDocument,
    ) -> Result<String, PipelineError> {
        let prompt = compose_answer_prompt(&self.ruleset, history, question, document);
        let answer = self.generate_first(&prompt, ANSWER_TEMPERATURE).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(PipelineError::Synthesis(
                "model returned an empty answer".to_string(),
            ));
        }
        Ok(answer.to_string())
    }

    async fn generate_first(&self, prompt: &str, temperature: f32) -> Result<String, PipelineError> {
        let request = GenerationRequest {
            model: self.settings.model.clone(),
            prompt: prompt.to_string(),
            temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };

        let candidates = self.generator.generate(&request).await.map_err(|err| {
            tracing::error!(error = %err, model = %request.model, "Text generation failed");
            PipelineError::Synthesis(err.to_string())
        })?;

        candidates
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Synthesis("model returned no candidates".to_string()))
    }
}
