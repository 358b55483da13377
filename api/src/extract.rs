//! Extractors that turn axum rejections into structured `AppError` responses.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

/// Drop-in replacement for `axum::Json<T>` whose rejections are `AppError::Validation`.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();

    AppError::Validation {
        field: Some(field_from_serde_message(&body_text).unwrap_or_else(|| "body".to_string())),
        message: format!("Invalid request body: {body_text}"),
        received: None,
        docs_hint: Some(
            "Send {\"question\": \"...\", \"history\": [{\"role\": \"user\", \"content\": \"...\"}]}. \
             The schema is served at /api-doc/openapi.json."
                .to_string(),
        ),
    }
}

/// Field named in serde's "missing field `x`" / "unknown field `x`" messages.
fn field_from_serde_message(msg: &str) -> Option<String> {
    ["missing field `", "unknown field `", "unknown variant `"]
        .iter()
        .find_map(|marker| {
            let after = &msg[msg.find(marker)? + marker.len()..];
            let end = after.find('`')?;
            Some(after[..end].to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_missing_field() {
        let msg = "Failed to deserialize the JSON body into the target type: missing field `question` at line 1 column 2";
        assert_eq!(field_from_serde_message(msg), Some("question".to_string()));
    }

    #[test]
    fn finds_unknown_variant() {
        let msg = "history[0].role: unknown variant `assistant`, expected `user` or `model`";
        assert_eq!(field_from_serde_message(msg), Some("assistant".to_string()));
    }

    #[test]
    fn generic_message_has_no_field() {
        assert_eq!(
            field_from_serde_message("invalid type: integer `3`, expected a string"),
            None
        );
    }
}
