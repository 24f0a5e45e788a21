//! LLM Client (C5): produces 6–10 affirmations from a structured
//! prompt, isolating parsing, validation, and retry from the rest of
//! the pipeline.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

const GENERATION_COST: &str = "0.21";
const MIN_LINES: usize = 6;
const MAX_LINES: usize = 12;
const MAX_SELECTED: usize = 10;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm response failed validation after retry: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, goal: &str, user_intention: &str) -> Result<(Vec<String>, Decimal), LlmError>;
}

pub struct HttpLlmClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl HttpLlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .expect("reqwest client builds"),
            api_key,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }

    fn build_prompt(goal: &str, user_intention: &str) -> String {
        format!(
            "Write 6 to 10 short, first-person, present-tense affirmations (<= 12 words each) \
             specific to this intention: \"{user_intention}\". Tone should suit the goal \"{goal}\". \
             Include at least 2 lines starting with \"I am\", at least 2 starting with \"I <verb>\", \
             and at least 1 starting with \"My <noun>\". One affirmation per line, no numbering."
        )
    }

    async fn call_once(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Request(format!("upstream status {}", response.status())));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| LlmError::Request(e.to_string()))?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Request("missing content in response".to_string()))
    }
}

/// Strip whitespace/empty lines and validate the 6..12 non-empty-line
/// contract; the caller retries once on rejection.
pub fn parse_lines(raw: &str) -> Result<Vec<String>, LlmError> {
    let lines: Vec<String> = raw
        .lines()
        .map(|l| l.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '-').trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect();

    if lines.len() < MIN_LINES || lines.len() > MAX_LINES {
        return Err(LlmError::InvalidResponse(format!("got {} lines, want 6..12", lines.len())));
    }

    Ok(lines)
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, goal: &str, user_intention: &str) -> Result<(Vec<String>, Decimal), LlmError> {
        let prompt = Self::build_prompt(goal, user_intention);

        let first = self.call_once(&prompt).await.and_then(|raw| parse_lines(&raw));
        let lines = match first {
            Ok(lines) => lines,
            Err(_) => {
                let nudge = format!("{prompt}\nReturn between 6 and 10 lines exactly, nothing else.");
                let retried = self.call_once(&nudge).await?;
                parse_lines(&retried)?
            }
        };

        let mut lines = lines;
        lines.truncate(MAX_SELECTED);

        let cost: Decimal = GENERATION_COST.parse().expect("valid decimal literal");
        Ok((lines, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lines_strips_blank_lines_and_numbering() {
        let raw = "1. I am calm\n\n2. I breathe easily\nI release tension\nMy mind is quiet\nI trust myself\nI am present";
        let lines = parse_lines(raw).unwrap();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "I am calm");
    }

    #[test]
    fn parse_lines_rejects_too_few() {
        let raw = "I am calm\nI breathe easily";
        assert!(parse_lines(raw).is_err());
    }

    #[test]
    fn parse_lines_rejects_too_many() {
        let raw = (0..13).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        assert!(parse_lines(&raw).is_err());
    }
}
