use std::io::Read;

use serde_json::json;
use tally_core::error::ApiError;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string()));
    std::process::exit(1);
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Map an HTTP status to the CLI's exit code: 0 for 2xx, 1 for 4xx, 2 otherwise.
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// Send a request, print the JSON response and return the structured exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<serde_json::Value>,
) -> i32 {
    let mut req = client().request(method, format!("{}{path}", api_url.trim_end_matches('/')));

    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check TALLY_API_URL."
            });
            eprintln!("{}", pretty(&err));
            return 3;
        }
    };

    let exit_code = exit_code_for(resp.status().as_u16());

    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };

    if exit_code == 0 {
        println!("{}", pretty(&resp_body));
    } else {
        eprintln!("{}", pretty(&resp_body));
    }

    exit_code
}

/// Best human-readable text for a failed response body.
pub fn error_text(status: u16, body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(api_error) => match api_error.docs_hint {
            Some(hint) => format!("{} ({hint})", api_error.message),
            None => api_error.message,
        },
        Err(_) if body.trim().is_empty() => format!("HTTP {status}"),
        Err(_) => format!("HTTP {status}: {}", body.trim()),
    }
}

/// Read text from a file path or stdin (when path is "-").
pub fn read_text_from_file(path: &str) -> Result<String, String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("Failed to read stdin: {e}"))?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_status_class() {
        assert_eq!(exit_code_for(200), 0);
        assert_eq!(exit_code_for(422), 1);
        assert_eq!(exit_code_for(429), 1);
        assert_eq!(exit_code_for(502), 2);
    }

    #[test]
    fn error_text_prefers_api_error_message() {
        let body = r#"{"error":"execution_failed","message":"query execution failed: relation \"evnts\" does not exist","request_id":"r1","docs_hint":"Rephrase the question."}"#;
        assert_eq!(
            error_text(422, body),
            "query execution failed: relation \"evnts\" does not exist (Rephrase the question.)"
        );
    }

    #[test]
    fn error_text_falls_back_to_raw_body() {
        assert_eq!(error_text(502, "Bad Gateway"), "HTTP 502: Bad Gateway");
        assert_eq!(error_text(500, ""), "HTTP 500");
    }
}
