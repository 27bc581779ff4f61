//! The upstream model API contract and its OpenAI Responses implementation.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{
    Method, Request, Response,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::{RelayError, RelayResult};
use crate::outbound::{ByteStream, call_outbound, call_outbound_stream, collect_body};
use crate::payload::ResponsesRequest;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";

/// A buffered upstream reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelReply {
    /// Upstream-assigned response id, doubles as the next continuation token.
    #[serde(default)]
    pub id: Option<String>,
    /// Raw structured output blocks, passed to the client untouched.
    #[serde(default)]
    pub output: Vec<Value>,
    /// Flattened text, when the upstream provides it.
    #[serde(default)]
    pub output_text: Option<String>,
}

impl ModelReply {
    /// The reply text: `output_text` when present, otherwise the concatenated
    /// text fragments of every output block.
    pub fn text(&self) -> String {
        if let Some(text) = &self.output_text {
            return text.clone();
        }
        self.output
            .iter()
            .filter_map(|block| block.get("content").and_then(Value::as_array))
            .flatten()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect()
    }
}

/// One incremental event of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The upstream assigned an id to the response being streamed
    ResponseId(String),
    /// A piece of output text
    TextDelta(String),
    /// The upstream finished the response
    Completed,
}

pub type EventStream = Pin<Box<dyn Stream<Item = RelayResult<StreamEvent>> + Send>>;

/// Black-box contract of the model API.
#[async_trait]
pub trait ModelApi: Send + Sync {
    async fn create(&self, request: &ResponsesRequest) -> RelayResult<ModelReply>;

    async fn create_stream(&self, request: &ResponsesRequest) -> RelayResult<EventStream>;
}

fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let p = url.path().to_string();
        url.set_path(&(p + "/"));
    }
    url
}

/// Client for OpenAI's `/responses` endpoint.
#[derive(Clone)]
pub struct OpenAiResponses {
    api_key: String,
    base_url: Url,
}

impl std::fmt::Debug for OpenAiResponses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiResponses")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl OpenAiResponses {
    pub fn new(api_key: impl Into<String>, base_url: Url) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: normalize_base_url(base_url),
        }
    }

    pub fn with_default_base_url(api_key: impl Into<String>) -> RelayResult<Self> {
        Ok(Self::new(api_key, Url::parse(DEFAULT_BASE_URL)?))
    }

    pub fn responses_request(&self, body: &ResponsesRequest) -> RelayResult<Request<Vec<u8>>> {
        let url = self.base_url.join("responses")?;
        let accept = if body.stream {
            "text/event-stream"
        } else {
            "application/json"
        };

        Ok(Request::builder()
            .method(Method::POST)
            .uri(url.to_string())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept)
            .body(serde_json::to_vec(body)?)?)
    }
}

#[async_trait]
impl ModelApi for OpenAiResponses {
    #[instrument(name = "openai.create", skip_all, fields(model = %request.model))]
    async fn create(&self, request: &ResponsesRequest) -> RelayResult<ModelReply> {
        let req = self.responses_request(request)?;
        let resp = call_outbound(req).await?;
        parse_reply(resp)
    }

    #[instrument(name = "openai.create_stream", skip_all, fields(model = %request.model))]
    async fn create_stream(&self, request: &ResponsesRequest) -> RelayResult<EventStream> {
        let req = self.responses_request(request)?;
        let resp = call_outbound_stream(req).await?;

        let status = resp.status();
        if !status.is_success() {
            let body = collect_body(resp.into_body()).await?;
            return Err(upstream_error(status, &body));
        }
        Ok(sse_events(resp.into_body()))
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Maps a non-2xx reply to an upstream error carrying the API's own message.
pub fn upstream_error(status: http::StatusCode, body: &[u8]) -> RelayError {
    match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(parsed) => RelayError::Upstream(parsed.error.message),
        Err(_) => RelayError::Upstream(format!(
            "{} ({})",
            String::from_utf8_lossy(body).trim(),
            status
        )),
    }
}

pub fn parse_reply(resp: Response<Vec<u8>>) -> RelayResult<ModelReply> {
    if !resp.status().is_success() {
        return Err(upstream_error(resp.status(), resp.body()));
    }

    serde_json::from_slice(resp.body()).map_err(|e| RelayError::ResponseFormatError {
        message: format!("Failed to decode API response: {e}"),
        raw_response: String::from_utf8_lossy(resp.body()).into_owned(),
    })
}

#[derive(Deserialize, Debug)]
struct SseEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<String>,
    response: Option<Value>,
    message: Option<String>,
}

/// Parses one SSE line into zero or more events.
pub fn parse_stream_line(line: &[u8]) -> RelayResult<Vec<StreamEvent>> {
    let text = String::from_utf8_lossy(line);
    let mut results = Vec::new();

    for line in text.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim_start();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }

        let event: SseEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "skipping undecodable stream event");
                continue;
            }
        };

        let response_id = event
            .response
            .as_ref()
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match event.kind.as_str() {
            "response.created" | "response.in_progress" => {
                if let Some(id) = response_id {
                    results.push(StreamEvent::ResponseId(id));
                }
            }
            "response.output_text.delta" => {
                if let Some(delta) = event.delta.filter(|d| !d.is_empty()) {
                    results.push(StreamEvent::TextDelta(delta));
                }
            }
            "response.completed" | "response.incomplete" => {
                if event.kind == "response.incomplete" {
                    warn!("upstream response truncated before completion");
                }
                if let Some(id) = response_id {
                    results.push(StreamEvent::ResponseId(id));
                }
                results.push(StreamEvent::Completed);
            }
            "response.failed" => {
                let message = event
                    .response
                    .as_ref()
                    .and_then(|r| r.get("error"))
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("upstream response failed");
                return Err(RelayError::Upstream(message.to_string()));
            }
            "error" => {
                let message = event
                    .message
                    .unwrap_or_else(|| "upstream stream error".to_string());
                return Err(RelayError::Upstream(message));
            }
            _ => {}
        }
    }

    Ok(results)
}

/// Splits a raw SSE body on newlines and decodes every complete line.
pub fn sse_events(body: ByteStream) -> EventStream {
    let s = body
        .chain(futures::stream::once(futures::future::ready(Ok(
            Bytes::from_static(b"\n"),
        ))))
        .scan(Vec::new(), |buffer: &mut Vec<u8>, res| {
            let out: Vec<RelayResult<StreamEvent>> = match res {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    let mut out = Vec::new();
                    let mut start = 0;
                    while let Some(pos) = buffer[start..].iter().position(|b| *b == b'\n') {
                        let end = start + pos + 1;
                        let parsed = parse_stream_line(&buffer[start..end]);
                        start = end;
                        match parsed {
                            Ok(events) => out.extend(events.into_iter().map(Ok)),
                            Err(e) => {
                                out.push(Err(e));
                                break;
                            }
                        }
                    }
                    buffer.drain(..start);
                    out
                }
                Err(e) => vec![Err(e)],
            };
            futures::future::ready(Some(out))
        })
        .flat_map(futures::stream::iter);

    Box::pin(s)
}
