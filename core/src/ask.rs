use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::conversation::{ConversationHistory, Turn};

/// Longest question accepted in one request, in characters.
pub const MAX_QUESTION_CHARS: usize = 4000;

/// Request body for `POST /v1/ask`.
///
/// The caller owns the conversation and sends it by value on every turn;
/// the server keeps nothing between requests.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AskRequest {
    /// The current natural-language question
    pub question: String,
    /// Prior turns, oldest first
    #[serde(default)]
    #[schema(value_type = Vec<Turn>)]
    pub history: ConversationHistory,
}

/// Successful answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AskResponse {
    /// Natural-language answer
    pub answer: String,
    /// The generated SQL, returned for diagnostics only
    pub query: String,
    /// Number of rows the query returned
    pub row_count: usize,
}
