//! Interactive session: read a question, ask the API, print the answer, repeat.
//!
//! The session owns the conversation. Every question is sent together with
//! all prior turns and both sides of the exchange are appended afterwards,
//! including exchanges that failed.

use std::io::Write;

use async_trait::async_trait;
use tally_core::ask::{AskRequest, AskResponse};
use tally_core::conversation::ConversationHistory;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::util::{client, error_text, exit_error};

/// Inputs that end the session (compared trimmed, case-insensitive).
pub const EXIT_TOKENS: &[&str] = &["exit", "quit", "종료"];

const PROMPT: &str = "> ";

#[derive(Debug, thiserror::Error)]
pub enum AskFailure {
    #[error("could not reach the Tally API: {0}")]
    Connection(#[from] reqwest::Error),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("the Tally API sent an unreadable answer: {0}")]
    Decode(String),
}

#[async_trait]
pub trait AskBackend: Send + Sync {
    async fn ask(
        &self,
        question: &str,
        history: &ConversationHistory,
    ) -> Result<AskResponse, AskFailure>;
}

/// Calls `POST /v1/ask` on a running API.
pub struct RemoteBackend {
    client: reqwest::Client,
    api_url: String,
}

impl RemoteBackend {
    pub fn new(api_url: &str) -> Self {
        Self {
            client: client(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AskBackend for RemoteBackend {
    async fn ask(
        &self,
        question: &str,
        history: &ConversationHistory,
    ) -> Result<AskResponse, AskFailure> {
        let body = AskRequest {
            question: question.to_string(),
            history: history.clone(),
        };

        let resp = self
            .client
            .post(format!("{}/v1/ask", self.api_url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AskFailure::Api {
                status,
                message: error_text(status, &text),
            });
        }

        let text = resp.text().await?;
        parse_answer(&text)
    }
}

/// Decode a successful `/v1/ask` body.
fn parse_answer(body: &str) -> Result<AskResponse, AskFailure> {
    serde_json::from_str(body).map_err(|e| AskFailure::Decode(e.to_string()))
}

pub fn is_exit_token(line: &str) -> bool {
    let line = line.trim();
    EXIT_TOKENS.iter().any(|token| line.eq_ignore_ascii_case(token))
}

enum SessionState {
    AwaitingInput,
    Invoking(String),
    Presenting(String),
}

pub struct Session<B> {
    backend: B,
    history: ConversationHistory,
}

impl<B: AskBackend> Session<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            history: ConversationHistory::new(),
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// One exchange. Always appends exactly two turns.
    pub async fn turn(&mut self, question: &str) -> String {
        let answer = match self.backend.ask(question, &self.history).await {
            Ok(response) => {
                tracing::debug!(
                    row_count = response.row_count,
                    query = %response.query,
                    "Question answered"
                );
                response.answer
            }
            Err(err) => {
                tracing::warn!(error = %err, "Question failed");
                format!("Error: {err}")
            }
        };

        self.history.record_exchange(question, answer.clone());
        answer
    }

    /// Drive the session until an exit token or end of input.
    pub async fn run<R, W>(&mut self, input: R, output: &mut W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        let mut state = SessionState::AwaitingInput;

        loop {
            state = match state {
                SessionState::AwaitingInput => {
                    write!(output, "{PROMPT}")?;
                    output.flush()?;

                    let Some(line) = lines.next_line().await? else {
                        break;
                    };
                    if is_exit_token(&line) {
                        break;
                    }
                    match line.trim() {
                        "" => SessionState::AwaitingInput,
                        question => SessionState::Invoking(question.to_string()),
                    }
                }
                SessionState::Invoking(question) => {
                    SessionState::Presenting(self.turn(&question).await)
                }
                SessionState::Presenting(answer) => {
                    writeln!(output, "{answer}\n")?;
                    SessionState::AwaitingInput
                }
            };
        }

        writeln!(output)?;
        tracing::info!(turns = self.history.len(), "Session ended");
        Ok(())
    }
}

pub async fn run(api_url: &str) -> i32 {
    println!(
        "Ask about your event data. Type {} to leave.\n",
        EXIT_TOKENS.join(" / ")
    );

    let mut session = Session::new(RemoteBackend::new(api_url));
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();

    if let Err(e) = session.run(stdin, &mut stdout).await {
        exit_error(&format!("Terminal I/O failed: {e}"), None);
    }
    0
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tally_core::conversation::{Role, Turn};

    use super::*;

    /// Answers from a script and remembers the history it was sent.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, String>>>,
        seen: Mutex<Vec<(String, ConversationHistory)>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<(String, ConversationHistory)> {
            self.seen.lock().expect("seen lock").clone()
        }
    }

    #[async_trait]
    impl AskBackend for ScriptedBackend {
        async fn ask(
            &self,
            question: &str,
            history: &ConversationHistory,
        ) -> Result<AskResponse, AskFailure> {
            self.seen
                .lock()
                .expect("seen lock")
                .push((question.to_string(), history.clone()));
            match self.replies.lock().expect("replies lock").pop_front() {
                Some(Ok(answer)) => Ok(AskResponse {
                    answer,
                    query: "SELECT 1".to_string(),
                    row_count: 1,
                }),
                Some(Err(message)) => Err(AskFailure::Api {
                    status: 422,
                    message,
                }),
                None => Err(AskFailure::Api {
                    status: 500,
                    message: "script exhausted".to_string(),
                }),
            }
        }
    }

    async fn run_session(backend: ScriptedBackend, input: &str) -> (Session<ScriptedBackend>, String) {
        let mut session = Session::new(backend);
        let mut output = Vec::new();
        session
            .run(input.as_bytes(), &mut output)
            .await
            .expect("session runs");
        (session, String::from_utf8(output).expect("output is utf-8"))
    }

    #[test]
    fn parse_answer_reads_ask_response() {
        let response = parse_answer(r#"{"answer":"42 users.","query":"SELECT 42","row_count":1}"#)
            .expect("body decodes");
        assert_eq!(response.answer, "42 users.");
        assert_eq!(response.row_count, 1);
    }

    #[test]
    fn unreadable_success_body_is_not_a_connection_failure() {
        let err = parse_answer("<html>proxy page</html>").expect_err("html is not an answer");
        assert!(matches!(err, AskFailure::Decode(_)));
        assert!(!err.to_string().contains("could not reach"));
    }

    #[test]
    fn exit_tokens_match_trimmed_and_case_insensitive() {
        assert!(is_exit_token("exit"));
        assert!(is_exit_token("  QUIT "));
        assert!(is_exit_token("종료"));
        assert!(is_exit_token("Exit\r"));
        assert!(!is_exit_token("exit now"));
        assert!(!is_exit_token(""));
    }

    #[tokio::test]
    async fn history_holds_two_turns_per_exchange() {
        let backend = ScriptedBackend::new(vec![Ok("a1"), Ok("a2"), Ok("a3")]);
        let (session, output) = run_session(backend, "q1\nq2\nq3\nexit\n").await;

        assert_eq!(session.history().len(), 6);
        let roles: Vec<Role> = session.history().turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Model, Role::User, Role::Model, Role::User, Role::Model]
        );
        assert_eq!(session.history().turns()[4], Turn::user("q3"));
        assert!(output.contains("a1") && output.contains("a3"));
    }

    #[tokio::test]
    async fn failed_turn_is_presented_and_recorded() {
        let backend = ScriptedBackend::new(vec![
            Err("query execution failed: relation \"evnts\" does not exist"),
            Ok("There were 42 users."),
        ]);
        let (session, output) = run_session(backend, "bad question\nhow many users?\n").await;

        let turns = session.history().turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0], Turn::user("bad question"));
        assert_eq!(
            turns[1],
            Turn::model("Error: query execution failed: relation \"evnts\" does not exist")
        );
        assert_eq!(turns[3], Turn::model("There were 42 users."));
        assert!(output.contains("Error: query execution failed"));
    }

    #[tokio::test]
    async fn exit_token_stops_before_invoking() {
        let backend = ScriptedBackend::new(vec![Ok("a1"), Ok("never")]);
        let (session, _) = run_session(backend, "q1\n  Quit \nq2\n").await;

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.backend.seen().len(), 1);
    }

    #[tokio::test]
    async fn end_of_input_ends_session() {
        let backend = ScriptedBackend::new(vec![Ok("a1")]);
        let (session, _) = run_session(backend, "q1").await;
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn blank_lines_are_ignored() {
        let backend = ScriptedBackend::new(vec![Ok("a1")]);
        let (session, output) = run_session(backend, "\n   \nq1\n\nexit\n").await;

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.backend.seen().len(), 1);
        assert_eq!(output.matches(PROMPT).count(), 5);
    }

    #[tokio::test]
    async fn follow_up_sends_prior_exchange() {
        let backend = ScriptedBackend::new(vec![
            Ok("Total revenue last week was 3,200,000 KRW."),
            Ok("The week before was 2,900,000 KRW."),
        ]);
        let (session, _) = run_session(
            backend,
            "What was total revenue last week?\nWhat about the week before that?\n",
        )
        .await;

        let seen = session.backend.seen();
        assert!(seen[0].1.is_empty());
        assert_eq!(seen[1].0, "What about the week before that?");
        assert_eq!(
            seen[1].1.turns(),
            &[
                Turn::user("What was total revenue last week?"),
                Turn::model("Total revenue last week was 3,200,000 KRW."),
            ]
        );
    }
}
