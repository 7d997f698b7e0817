use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::models::ChatMessage;

pub const DEFAULT_BASE_URL: &str = "https://api.together.xyz/v1";
pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct-Turbo";
const COMPLETIONS_PATH: &str = "/chat/completions";
const STOP_SEQUENCES: &[&str] = &["<|eot_id|>", "<|eom_id|>"];

// Sampling parameters sent with every request
#[derive(Debug, Clone, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repetition_penalty: f32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.7,
            top_k: 50,
            repetition_penalty: 1.0,
        }
    }
}

#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Forwards each text fragment to `sink` as it arrives and returns the
    /// full answer.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        sink: &mpsc::UnboundedSender<String>,
    ) -> Result<String>;
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repetition_penalty: f32,
    stop: &'a [&'a str],
    stream: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

// Client for a Together / OpenAI compatible chat completions endpoint
pub struct CompletionClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    sampling: Sampling,
}

impl CompletionClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        sampling: Sampling,
    ) -> Self {
        Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), COMPLETIONS_PATH),
            api_key: api_key.into(),
            model: model.into(),
            sampling,
        }
    }

    fn request<'a>(&'a self, messages: &'a [ChatMessage], stream: bool) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            messages,
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            top_k: self.sampling.top_k,
            repetition_penalty: self.sampling.repetition_penalty,
            stop: STOP_SEQUENCES,
            stream,
        }
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request(messages, stream))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, body = %body, "completion API returned an error");
            return Err(GatewayError::Upstream(format!(
                "completion API returned {status}"
            )));
        }
        Ok(res)
    }
}

#[async_trait]
impl Completion for CompletionClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!(model = %self.model, messages = messages.len(), "calling completion API");
        let body: ApiResponse = self
            .send(messages, false)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(format!("unreadable completion: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| GatewayError::Upstream("completion had no choices".to_string()))
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        sink: &mpsc::UnboundedSender<String>,
    ) -> Result<String> {
        debug!(model = %self.model, messages = messages.len(), "streaming from completion API");
        let mut body = self.send(messages, true).await?.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut answer = String::new();

        'read: while let Some(chunk) = body.next().await {
            for event in decoder.feed(&chunk?) {
                match event {
                    SseEvent::Fragment(text) => {
                        answer.push_str(&text);
                        // receiver gone means the client hung up; keep the answer anyway
                        let _ = sink.send(text);
                    }
                    SseEvent::Done => break 'read,
                }
            }
        }

        Ok(answer.trim().to_string())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    Done,
}

/// Splits a server-sent-events body into content fragments. Bytes are
/// buffered until a full line arrives, so multi-byte characters split across
/// chunks survive.
#[derive(Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }
            match serde_json::from_str::<StreamChunk>(data) {
                Ok(chunk) => {
                    let text = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                        .unwrap_or_default();
                    if !text.is_empty() {
                        events.push(SseEvent::Fragment(text));
                    }
                }
                Err(e) => debug!(error = %e, "skipping unparseable stream line"),
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[test]
    fn decoder_collects_fragments_until_done() {
        let mut decoder = SseDecoder::default();
        let body = format!("{}{}data: [DONE]\n\n", line("Hello"), line(", world"));

        let events = decoder.feed(body.as_bytes());
        assert_eq!(
            events,
            vec![
                SseEvent::Fragment("Hello".to_string()),
                SseEvent::Fragment(", world".to_string()),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn decoder_handles_lines_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let body = line("Visa Signature ✈");
        let bytes = body.as_bytes();
        // split inside the multi-byte character
        let split = body.find('✈').unwrap() + 1;

        assert!(decoder.feed(&bytes[..split]).is_empty());
        assert_eq!(
            decoder.feed(&bytes[split..]),
            vec![SseEvent::Fragment("Visa Signature ✈".to_string())]
        );
    }

    #[test]
    fn decoder_ignores_comments_and_empty_deltas() {
        let mut decoder = SseDecoder::default();
        let body = ": keep-alive\n\ndata: {\"choices\":[{\"delta\":{}}]}\n\ndata: not json\n\n";
        assert!(decoder.feed(body.as_bytes()).is_empty());
    }

    #[test]
    fn request_carries_sampling_and_stop_sequences() {
        let client = CompletionClient::new(
            reqwest::Client::new(),
            "https://api.example.test/v1/",
            "key",
            DEFAULT_MODEL,
            Sampling::default(),
        );
        assert_eq!(client.url, "https://api.example.test/v1/chat/completions");

        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let json = serde_json::to_value(client.request(&messages, true)).unwrap();
        assert_eq!(json["model"], DEFAULT_MODEL);
        assert_eq!(json["top_k"], 50);
        assert_eq!(json["stop"][0], "<|eot_id|>");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][1]["role"], "user");
    }
}
