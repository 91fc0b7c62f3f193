//! Ollama API client (http://127.0.0.1:11434 by default).
//! Chat replies are streamed as NDJSON and surfaced as a stream of content deltas.

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::backend::{ChatBackend, ChatMessage, ChunkStream, LlmError, ModelDescriptor};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Client for Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(LlmError::Api(format!("{} {}", status, body.trim())))
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    /// GET /api/tags: list available models.
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let res = self.client.get(&url).send().await?;
        let res = Self::check_status(res).await?;
        let data: TagsResponse = res.json().await?;
        Ok(data.models.unwrap_or_default())
    }

    /// POST /api/chat with stream: true. Each NDJSON line carries a content delta; the line with
    /// `done: true` ends the reply.
    async fn chat_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChunkStream, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: model.to_string(),
            messages,
            stream: true,
        };
        log::debug!("ollama: chat request to {} with model {}", url, model);
        let res = self.client.post(&url).json(&body).send().await?;
        let res = Self::check_status(res).await?;
        Ok(reply_stream(res.bytes_stream().boxed()))
    }
}

type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

struct ReplyState {
    bytes: ByteStream,
    decoder: NdjsonDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

impl ReplyState {
    /// Queue the deltas carried by complete lines. Stops at `done` or at the first bad line.
    fn absorb(&mut self, lines: Vec<String>) {
        for line in lines {
            if self.finished {
                return;
            }
            match parse_stream_line(&line) {
                Ok(event) => {
                    if !event.content.is_empty() {
                        self.pending.push_back(Ok(event.content));
                    }
                    if event.done {
                        self.finished = true;
                    }
                }
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                }
            }
        }
    }
}

fn reply_stream(bytes: ByteStream) -> ChunkStream {
    let state = ReplyState {
        bytes,
        decoder: NdjsonDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    let lines = st.decoder.push(&chunk);
                    st.absorb(lines);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(LlmError::Request(e)), st));
                }
                None => {
                    let tail = st.decoder.finish().into_iter().collect();
                    st.absorb(tail);
                    if !st.finished {
                        st.finished = true;
                        st.pending.push_back(Err(LlmError::Incomplete));
                    }
                }
            }
        }
    })
    .boxed()
}

/// Splits a byte stream into newline-delimited lines, buffering partial lines across chunks.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    /// Feed bytes; returns every complete, non-blank line (trimmed).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(i) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=i).collect();
            let line = String::from_utf8_lossy(&line_bytes).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Remaining unterminated line at end of input, if any.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest).trim().to_string();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

#[derive(Debug, PartialEq)]
struct StreamLine {
    content: String,
    done: bool,
}

fn parse_stream_line(line: &str) -> Result<StreamLine, LlmError> {
    let event: ChatStreamEvent =
        serde_json::from_str(line).map_err(|e| LlmError::Malformed(e.to_string()))?;
    if let Some(error) = event.error {
        return Err(LlmError::Api(error));
    }
    Ok(StreamLine {
        content: event.message.map(|m| m.content).unwrap_or_default(),
        done: event.done,
    })
}

#[derive(Debug, Deserialize)]
struct ChatStreamEvent {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<ModelDescriptor>>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}
