use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("completion was empty")]
    Empty,
    #[error("completion is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Parses raw completion text into an untrusted JSON value, tolerating a surrounding code fence
/// (with or without a language tag).
pub fn extract_candidate(raw: &str) -> Result<Value, ExtractionError> {
    let body = strip_code_fence(raw.trim());
    if body.is_empty() {
        return Err(ExtractionError::Empty);
    }
    Ok(serde_json::from_str(body)?)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag that may follow the opening fence.
    let rest = match rest.find('\n') {
        Some(newline) if !rest[..newline].trim_start().starts_with(['{', '[']) => {
            &rest[newline + 1..]
        }
        _ => rest.trim_start_matches(|ch: char| ch.is_ascii_alphabetic()),
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
