//! OpenAI-compatible LLM client
//!
//! Backs the intent parser, embedder, placeholder completer and join
//! suggester. Replies are run through `parse_json_reply` before anything
//! else looks at them.

use crate::collaborators::{CompletionRequest, Embedder, IntentParser, JoinRequest, JoinSuggester, PlaceholderCompleter};
use crate::error::{Result, SketchError};
use crate::prompts;
use crate::schema::SchemaSnapshot;
use crate::template::Embedding;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
}

impl LlmClient {
    pub fn new(api_key: String, base_url: String, chat_model: String, embedding_model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_model,
            embedding_model,
        }
    }

    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(&format!("{}/{}", self.base_url, endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| SketchError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SketchError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| SketchError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(SketchError::Llm(format!("LLM API error: {}", error)));
        }
        Ok(response_json)
    }

    /// Single chat completion; returns the raw message content.
    pub async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": prompts::JSON_ONLY_SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0,
        });
        let response_json = self.post_json("chat/completions", &body).await?;

        let choice = response_json
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| SketchError::Llm(format!("No choices in LLM response: {}", response_json)))?;

        match choice.get("finish_reason").and_then(Value::as_str) {
            Some("length") => warn!("LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(SketchError::Llm("LLM response was filtered by content policy".to_string()))
            }
            _ => {}
        }

        let content = choice["message"]["content"].as_str().unwrap_or_default();
        if content.trim().is_empty() {
            return Err(SketchError::Llm("No content returned from LLM".to_string()));
        }
        debug!("LLM replied with {} bytes", content.len());
        Ok(content.to_string())
    }

    async fn call_llm_json(&self, prompt: &str) -> Result<Value> {
        let raw = self.call_llm(prompt).await?;
        parse_json_reply(&raw)
    }
}

#[async_trait]
impl IntentParser for LlmClient {
    async fn parse(&self, nl_text: &str, schema: &SchemaSnapshot) -> Result<Value> {
        self.call_llm_json(&prompts::intent_prompt(nl_text, schema)).await
    }
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": text,
        });
        let response_json = self
            .post_json("embeddings", &body)
            .await
            .map_err(|e| SketchError::Embedding(e.to_string()))?;

        let values = response_json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| SketchError::Embedding("No embedding in response".to_string()))?;
        values
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| SketchError::Embedding(format!("Non-numeric embedding component: {}", v)))
            })
            .collect()
    }
}

#[async_trait]
impl PlaceholderCompleter for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        let prompt = prompts::completion_prompt(&request.user_query, &request.partial_sql, &request.schema_columns);
        self.call_llm_json(&prompt).await
    }
}

#[async_trait]
impl JoinSuggester for LlmClient {
    async fn suggest_join(&self, request: &JoinRequest) -> Result<Value> {
        let prompt = prompts::join_prompt(
            &request.user_query,
            &request.missing_column,
            &request.main_table,
            &request.schema_columns,
        );
        self.call_llm_json(&prompt).await
    }
}

/// Remove a surrounding Markdown code fence, with or without a language tag.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Drop chatter before the first `{` and after the last `}`.
fn trim_to_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Normalization steps applied, in order, before parsing.
const REPLY_NORMALIZERS: [fn(&str) -> &str; 3] = [str::trim, strip_code_fence, trim_to_object];

/// Parse a JSON object out of a chat reply.
pub fn parse_json_reply(raw: &str) -> Result<Value> {
    let text = REPLY_NORMALIZERS.iter().fold(raw, |acc, step| step(acc));
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SketchError::Llm(format!("Invalid JSON returned by LLM: {}. Reply: {}", e, text)))?;
    if !value.is_object() {
        return Err(SketchError::Llm(format!("Expected a JSON object from LLM, got: {}", text)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_plain_json() {
        assert_eq!(parse_json_reply(r#"{"table": "\"singer\""}"#).unwrap(), json!({"table": "\"singer\""}));
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"column\": \"\\\"Name\\\"\"}\n```";
        assert_eq!(parse_json_reply(raw).unwrap(), json!({"column": "\"Name\""}));
        assert_eq!(parse_json_reply("```\n{\"a\": 1}\n```").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_parse_json_with_chatter() {
        let raw = "Sure! Here it is:\n{\"join_table\": \"songs\"}\nHope that helps.";
        assert_eq!(parse_json_reply(raw).unwrap(), json!({"join_table": "songs"}));
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(parse_json_reply("not json"), Err(SketchError::Llm(_))));
        assert!(matches!(parse_json_reply("[1, 2]"), Err(SketchError::Llm(_))));
        assert!(matches!(parse_json_reply(""), Err(SketchError::Llm(_))));
    }

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buffer.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buffer).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if buffer.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    fn client(base_url: String) -> LlmClient {
        LlmClient::new("test-key".into(), base_url, "gpt-3.5-turbo".into(), "text-embedding-ada-002".into())
    }

    #[tokio::test]
    async fn test_completion_through_http() {
        let body = json!({
            "choices": [{
                "message": {"content": "```json\n{\"table\": \"\\\"singer\\\"\"}\n```"},
                "finish_reason": "stop"
            }]
        })
        .to_string();
        let llm = client(serve_once("200 OK", body).await);
        let request = CompletionRequest {
            user_query: "names".into(),
            partial_sql: "SELECT 1".into(),
            schema_columns: Default::default(),
        };
        let reply = llm.complete(&request).await.unwrap();
        assert_eq!(reply, json!({"table": "\"singer\""}));
    }

    #[tokio::test]
    async fn test_embedding_through_http() {
        let body = json!({"data": [{"embedding": [0.5, -0.25, 1.0]}]}).to_string();
        let llm = client(serve_once("200 OK", body).await);
        assert_eq!(llm.embed("hello").await.unwrap(), vec![0.5, -0.25, 1.0]);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let llm = client(serve_once("500 Internal Server Error", "{}".to_string()).await);
        let err = llm.call_llm("hi").await.unwrap_err();
        assert!(matches!(err, SketchError::Llm(ref m) if m.contains("500")));
    }
}
