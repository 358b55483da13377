use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use tally_core::ask::{AskRequest, AskResponse, MAX_QUESTION_CHARS};
use tally_core::error::ApiError;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/ask", post(ask))
}

fn validate_question(question: &str) -> Result<(), AppError> {
    if question.trim().is_empty() {
        return Err(AppError::Validation {
            message: "question must not be empty".to_string(),
            field: Some("question".to_string()),
            received: Some(serde_json::Value::String(question.to_string())),
            docs_hint: Some("Ask a question about the event data, e.g. \"How many users yesterday?\"".to_string()),
        });
    }

    let chars = question.chars().count();
    if chars > MAX_QUESTION_CHARS {
        return Err(AppError::Validation {
            message: format!("question is {chars} characters; the limit is {MAX_QUESTION_CHARS}"),
            field: Some("question".to_string()),
            received: Some(serde_json::json!(chars)),
            docs_hint: Some("Shorten the question or split it into follow-ups.".to_string()),
        });
    }

    Ok(())
}

/// Answer one natural-language question
///
/// Translates the question into a query, runs it against the event store and
/// summarizes the rows. The caller sends the whole prior conversation with
/// every request and appends the returned answer itself.
#[utoipa::path(
    post,
    path = "/v1/ask",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Question answered", body = AskResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 422, description = "Generated query failed", body = ApiError),
        (status = 429, description = "Rate limited", body = ApiError),
        (status = 500, description = "Store returned an unreadable result", body = ApiError),
        (status = 502, description = "Language model failed", body = ApiError)
    ),
    tag = "ask"
)]
pub async fn ask(
    State(state): State<AppState>,
    AppJson(req): AppJson<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    validate_question(&req.question)?;

    let answer = state
        .pipeline
        .ask(req.question.trim(), &req.history)
        .await?;

    Ok(Json(AskResponse {
        row_count: answer.document.row_count(),
        answer: answer.answer,
        query: answer.query,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::pipeline::Pipeline;
    use crate::pipeline::tests::{ScriptedGenerator, StubExecutor, ruleset, settings};

    fn app(generator: Arc<ScriptedGenerator>, executor: Arc<StubExecutor>) -> Router {
        let pipeline = Pipeline::new(generator, executor, ruleset(), settings());
        router().with_state(AppState {
            pipeline: Arc::new(pipeline),
        })
    }

    async fn post_ask(app: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/ask")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        (status, serde_json::from_slice(&bytes).expect("body should be json"))
    }

    #[tokio::test]
    async fn answers_question_with_row_count() {
        let generator = Arc::new(ScriptedGenerator::replies(&[
            "SELECT COUNT(DISTINCT user_pseudo_id) AS users FROM analytics.events",
            "There were 42 users.",
        ]));
        let executor = Arc::new(StubExecutor::rows(r#"[{"users":42}]"#));

        let (status, body) = post_ask(
            app(generator, executor),
            serde_json::json!({"question": "How many users yesterday?"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "There were 42 users.");
        assert_eq!(body["row_count"], 1);
        assert_eq!(
            body["query"],
            "SELECT COUNT(DISTINCT user_pseudo_id) AS users FROM analytics.events"
        );
    }

    #[tokio::test]
    async fn history_in_body_reaches_prompt() {
        let generator = Arc::new(ScriptedGenerator::replies(&["SELECT 1", "ok"]));
        let executor = Arc::new(StubExecutor::rows("[]"));

        let (status, _) = post_ask(
            app(generator.clone(), executor),
            serde_json::json!({
                "question": "What about the week before that?",
                "history": [
                    {"role": "user", "content": "What was total revenue last week?"},
                    {"role": "model", "content": "3,200,000 KRW."}
                ]
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let prompt = &generator.requests()[0].prompt;
        let first = prompt
            .find("What was total revenue last week?")
            .expect("first turn present");
        let second = prompt.find("3,200,000 KRW.").expect("second turn present");
        assert!(first < second);
    }

    #[tokio::test]
    async fn blank_question_is_rejected_before_pipeline() {
        let generator = Arc::new(ScriptedGenerator::replies(&["SELECT 1", "ok"]));
        let executor = Arc::new(StubExecutor::rows("[]"));

        let (status, body) = post_ask(
            app(generator.clone(), executor),
            serde_json::json!({"question": "   "}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "question");
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn overlong_question_is_rejected() {
        let generator = Arc::new(ScriptedGenerator::replies(&[]));
        let executor = Arc::new(StubExecutor::rows("[]"));

        let (status, body) = post_ask(
            app(generator, executor),
            serde_json::json!({"question": "가".repeat(MAX_QUESTION_CHARS + 1)}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["received"], MAX_QUESTION_CHARS + 1);
    }

    #[tokio::test]
    async fn missing_question_names_the_field() {
        let (status, body) = post_ask(
            app(
                Arc::new(ScriptedGenerator::replies(&[])),
                Arc::new(StubExecutor::rows("[]")),
            ),
            serde_json::json!({"history": []}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "question");
    }

    #[tokio::test]
    async fn execution_failure_maps_to_422() {
        let generator = Arc::new(ScriptedGenerator::replies(&["SELECT * FROM evnts", "unused"]));
        let executor = Arc::new(StubExecutor::failing("relation \"evnts\" does not exist"));

        let (status, body) = post_ask(
            app(generator, executor),
            serde_json::json!({"question": "q"}),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "execution_failed");
    }

    #[tokio::test]
    async fn synthesis_failure_maps_to_502() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Err("quota exceeded".to_string())]));
        let executor = Arc::new(StubExecutor::rows("[]"));

        let (status, body) = post_ask(
            app(generator, executor),
            serde_json::json!({"question": "q"}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "synthesis_failed");
    }

    #[tokio::test]
    async fn malformed_store_document_maps_to_500() {
        let generator = Arc::new(ScriptedGenerator::replies(&["SELECT 42", "unused"]));
        let executor = Arc::new(StubExecutor::rows(r#"[{"n":1}, 2]"#));

        let (status, body) = post_ask(
            app(generator, executor),
            serde_json::json!({"question": "q"}),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal_error");
    }
}
