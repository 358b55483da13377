use tally_core::ask::AskRequest;
use tally_core::conversation::ConversationHistory;

use crate::util::{api_request, exit_error, read_text_from_file};

/// One question, optional prior conversation from a file (or stdin with "-").
pub async fn run(api_url: &str, question: &str, history_file: Option<&str>) -> i32 {
    let history = match history_file {
        None => ConversationHistory::new(),
        Some(path) => match load_history(path) {
            Ok(history) => history,
            Err(message) => exit_error(
                &message,
                Some("History is a JSON array of {\"role\": \"user\"|\"model\", \"content\": \"...\"} objects"),
            ),
        },
    };

    let body = AskRequest {
        question: question.to_string(),
        history,
    };
    let body = match serde_json::to_value(&body) {
        Ok(v) => v,
        Err(e) => exit_error(&format!("Failed to encode request: {e}"), None),
    };

    api_request(api_url, reqwest::Method::POST, "/v1/ask", Some(body)).await
}

fn load_history(path: &str) -> Result<ConversationHistory, String> {
    let raw = read_text_from_file(path)?;
    if raw.trim().is_empty() {
        return Ok(ConversationHistory::new());
    }
    ConversationHistory::parse(&raw).map_err(|e| format!("Invalid history in '{path}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tally-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).expect("temp file writes");
        path
    }

    #[test]
    fn load_history_reads_turns_in_order() {
        let path = temp_file(
            "history.json",
            r#"[{"role":"user","content":"q1"},{"role":"model","content":"a1"}]"#,
        );
        let history = load_history(path.to_str().expect("utf-8 path")).expect("history loads");
        std::fs::remove_file(&path).ok();

        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[1].content, "a1");
    }

    #[test]
    fn load_history_treats_empty_file_as_new_conversation() {
        let path = temp_file("empty.json", "\n");
        let history = load_history(path.to_str().expect("utf-8 path")).expect("empty is fine");
        std::fs::remove_file(&path).ok();
        assert!(history.is_empty());
    }

    #[test]
    fn load_history_rejects_unknown_role() {
        let path = temp_file("bad.json", r#"[{"role":"assistant","content":"hi"}]"#);
        let err = load_history(path.to_str().expect("utf-8 path")).expect_err("role is invalid");
        std::fs::remove_file(&path).ok();
        assert!(err.contains("Invalid history"));
    }
}
