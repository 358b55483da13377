use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One role-tagged utterance. Turns are never edited after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// Ordered, append-only log of turns owned by a single session.
///
/// Insertion order is conversational order. There is no way to reorder or
/// remove turns; [`ConversationHistory::within_budget`] only produces a
/// shortened copy for prompting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Append a question and the text that was shown for it, in that order.
    pub fn record_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.push(Turn::user(question));
        self.push(Turn::model(answer));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Stable JSON encoding: an array of `{"role", "content"}` objects.
    /// Non-ASCII content is kept as-is.
    pub fn serialize(&self) -> String {
        serde_json::to_string(&self.turns).unwrap_or_else(|_| "[]".to_string())
    }

    /// Inverse of [`ConversationHistory::serialize`].
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let turns: Vec<Turn> = serde_json::from_str(text)?;
        Ok(Self { turns })
    }

    /// Copy of the most recent exchanges whose serialized form fits in
    /// `max_chars`. Exchanges are dropped oldest-first, so a non-empty view
    /// starts with a user turn (or the first turn of the history). A budget
    /// of `None` keeps everything.
    pub fn within_budget(&self, max_chars: Option<usize>) -> ConversationHistory {
        let Some(max_chars) = max_chars else {
            return self.clone();
        };

        // "[" + "]" plus one separator per turn after the first
        let mut used = 2;
        let mut start = self.turns.len();
        let mut pending = 0;
        let mut pending_turns = 0;
        for (index, turn) in self.turns.iter().enumerate().rev() {
            let cost = serde_json::to_string(turn)
                .map(|encoded| encoded.chars().count())
                .unwrap_or(usize::MAX / 2);
            let separator = usize::from(start != self.turns.len() || pending_turns > 0);
            pending += cost + separator;
            pending_turns += 1;
            if used + pending > max_chars {
                break;
            }
            // only cut in front of a question
            if turn.role == Role::User || index == 0 {
                used += pending;
                start = index;
                pending = 0;
                pending_turns = 0;
            }
        }

        ConversationHistory {
            turns: self.turns[start..].to_vec(),
        }
    }
}

impl From<Vec<Turn>> for ConversationHistory {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}
