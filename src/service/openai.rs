//! OpenAI-compatible and Azure OpenAI chat-completion adapter.
//!
//! One [`OpenAiService`] speaks to either flavour; they differ only in URL
//! layout and auth header:
//!
//! | Flavour | URL | Auth |
//! |---------|-----|------|
//! | OpenAI-compatible | `{base_url}/chat/completions` | `Authorization: Bearer` |
//! | Azure OpenAI | `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=` | `api-key` |
//!
//! Requests always stream (`stream: true`) and always carry the output schema
//! as a strict `json_schema` response format.
//!
//! [`OpenAiThreads`] exposes the `threads` resource of the same API as a
//! [`SessionProvider`].

use crate::error::{ExtractError, PiiError};
use crate::pipeline::conversation::{ContentItem, Role, Turn};
use crate::pipeline::encode::{to_data_url, IMAGE_DETAIL};
use crate::pipeline::llm::{CompletionRequest, DeltaStream, ModelService};
use crate::service::sse::{SseDecoder, SseEvent};
use crate::session::{SessionHandle, SessionProvider};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Default base URL of the OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Azure API version used for the `threads` resource, which the GA
/// chat-completion versions do not include.
pub const AZURE_THREADS_API_VERSION: &str = "2024-05-01-preview";

/// Longest service error body kept in an error detail.
const MAX_ERROR_BODY: usize = 512;

#[derive(Clone)]
enum Flavor {
    OpenAi {
        base_url: String,
        model: String,
    },
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

/// Streaming chat-completion client for OpenAI-compatible and Azure endpoints.
#[derive(Clone)]
pub struct OpenAiService {
    client: Client,
    flavor: Flavor,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for OpenAiService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiService")
            .field("name", &self.name())
            .field("url", &self.completions_url())
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiService {
    /// OpenAI (or any OpenAI-compatible server) at [`OPENAI_BASE_URL`].
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, PiiError> {
        Ok(Self {
            client: build_client()?,
            flavor: Flavor::OpenAi {
                base_url: OPENAI_BASE_URL.to_string(),
                model: model.into(),
            },
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
        })
    }

    /// Azure OpenAI resource `endpoint` serving `deployment`.
    pub fn azure(
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Result<Self, PiiError> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(PiiError::InvalidConfig(format!(
                "Azure endpoint must be an http(s) URL, got '{endpoint}'"
            )));
        }
        Ok(Self {
            client: build_client()?,
            flavor: Flavor::Azure {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                deployment: deployment.into(),
                api_version: api_version.into(),
            },
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
        })
    }

    /// Point an OpenAI-compatible service at another server. No effect on Azure.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        if let Flavor::OpenAi { base_url, .. } = &mut self.flavor {
            *base_url = url.into().trim_end_matches('/').to_string();
        }
        self
    }

    /// Time allowed for the request to be accepted and the stream to start.
    ///
    /// Does not bound the stream itself: a slow but live stream is not cut.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sessions on the same account, sharing this service's connection pool.
    pub fn threads(&self) -> OpenAiThreads {
        OpenAiThreads {
            service: self.clone(),
        }
    }

    pub fn completions_url(&self) -> String {
        match &self.flavor {
            Flavor::OpenAi { base_url, .. } => format!("{base_url}/chat/completions"),
            Flavor::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            ),
        }
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match self.flavor {
            Flavor::OpenAi { .. } => req.bearer_auth(&self.api_key),
            Flavor::Azure { .. } => req.header("api-key", &self.api_key),
        }
    }

    /// JSON body of the completion request.
    ///
    /// # Errors
    /// [`ExtractError::SchemaRejected`] if the body cannot be serialised.
    pub fn request_body(&self, request: &CompletionRequest<'_>) -> Result<Value, ExtractError> {
        let model = match &self.flavor {
            Flavor::OpenAi { model, .. } => Some(model.as_str()),
            Flavor::Azure { .. } => None,
        };
        let body = ChatRequest {
            model,
            messages: request
                .conversation
                .turns()
                .iter()
                .map(WireMessage::from_turn)
                .collect(),
            stream: true,
            response_format: request.schema.response_format(),
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens,
            user: request.session.map(SessionHandle::id),
        };
        serde_json::to_value(body).map_err(|e| ExtractError::SchemaRejected {
            service: self.name().to_string(),
            detail: format!("request body not serialisable: {e}"),
        })
    }
}

fn build_client() -> Result<Client, PiiError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| PiiError::Internal(format!("HTTP client: {e}")))
}

#[async_trait]
impl ModelService for OpenAiService {
    fn name(&self) -> &str {
        match self.flavor {
            Flavor::OpenAi { .. } => "openai",
            Flavor::Azure { .. } => "azure",
        }
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<DeltaStream, ExtractError> {
        let body = self.request_body(&request)?;
        let send = self
            .authorize(self.client.post(self.completions_url()))
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                return Err(ExtractError::ServiceUnavailable {
                    service: self.name().to_string(),
                    detail: transport_detail(&e),
                })
            }
            Err(_) => {
                return Err(ExtractError::ServiceUnavailable {
                    service: self.name().to_string(),
                    detail: format!("no response within {}s", self.timeout.as_secs()),
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(self.name(), status, &text));
        }

        debug!("{} accepted completion request ({})", self.name(), status);
        Ok(delta_stream(response.bytes_stream()))
    }
}

/// Map a non-success HTTP status to the request-time taxonomy.
pub fn classify_status(service: &str, status: StatusCode, body: &str) -> ExtractError {
    let detail = format!("HTTP {}: {}", status.as_u16(), error_message(body));
    let service = service.to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ExtractError::AuthRejected { service, detail }
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ExtractError::SchemaRejected { service, detail }
        }
        _ => ExtractError::ServiceUnavailable { service, detail },
    }
}

/// Pull `error.message` out of an API error body, else a bounded prefix of it.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorMessage,
    }
    #[derive(Deserialize)]
    struct ErrorMessage {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(b) => b.error.message,
        Err(_) => body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

fn transport_detail(e: &reqwest::Error) -> String {
    if e.is_connect() {
        format!("connection failed: {e}")
    } else if e.is_timeout() {
        format!("timed out: {e}")
    } else {
        e.to_string()
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<WireMessage>,
    stream: bool,
    response_format: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Serialize)]
struct WireMessage {
    role: Role,
    content: WireContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Serialize)]
struct WireImageUrl {
    url: String,
    detail: &'static str,
}

impl WireMessage {
    fn from_turn(turn: &Turn) -> Self {
        let has_image = turn.images().next().is_some();
        let content = if has_image {
            WireContent::Parts(
                turn.content
                    .iter()
                    .map(|item| match item {
                        ContentItem::Text(text) => WirePart::Text { text: text.clone() },
                        ContentItem::Image(img) => WirePart::ImageUrl {
                            image_url: WireImageUrl {
                                url: to_data_url(img),
                                detail: IMAGE_DETAIL,
                            },
                        },
                    })
                    .collect(),
            )
        } else {
            WireContent::Text(turn.text_content())
        };
        Self {
            role: turn.role,
            content,
        }
    }
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

// ── Delta stream ─────────────────────────────────────────────────────────

struct DeltaState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
    closed: bool,
}

impl<S> DeltaState<S> {
    /// Fold one event into the state. `Err` ends the stream.
    fn absorb(&mut self, event: SseEvent) -> Result<(), ExtractError> {
        if event.is_error() {
            return Err(ExtractError::StreamInterrupted {
                detail: format!("service sent an error event: {}", error_message(&event.data)),
            });
        }
        if event.is_done() {
            self.finished = true;
            self.closed = true;
            return Ok(());
        }

        let payload: ChunkPayload =
            serde_json::from_str(&event.data).map_err(|e| ExtractError::StreamInterrupted {
                detail: format!("malformed stream event: {e}"),
            })?;
        if let Some(err) = payload.error {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ExtractError::StreamInterrupted {
                detail: format!("service error mid-stream: {message}"),
            });
        }

        for choice in payload.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                self.pending.push_back(text);
            }
            if let Some(reason) = choice.finish_reason {
                debug!("Stream finish_reason: {}", reason);
                self.finished = true;
            }
        }
        Ok(())
    }
}

/// Turn an event-stream body into content deltas.
///
/// The body ending before `[DONE]` or a `finish_reason` is an interruption,
/// as is any transport error.
pub(crate) fn delta_stream<S, B, E>(body: S) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = DeltaState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
        closed: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(text) = st.pending.pop_front() {
                return Some((Ok(text), st));
            }
            if st.closed {
                return None;
            }

            let decoded = match st.body.next().await {
                Some(Ok(bytes)) => st.decoder.push(bytes.as_ref()),
                Some(Err(e)) => {
                    warn!("Transport error mid-stream: {}", e);
                    st.closed = true;
                    return Some((
                        Err(ExtractError::StreamInterrupted {
                            detail: e.to_string(),
                        }),
                        st,
                    ));
                }
                None => {
                    st.closed = true;
                    st.decoder.finish()
                }
            };
            let events = match decoded {
                Ok(events) => events,
                Err(e) => {
                    warn!("Undecodable stream line: {}", e);
                    st.closed = true;
                    st.pending.clear();
                    return Some((Err(e), st));
                }
            };

            for event in events {
                if let Err(e) = st.absorb(event) {
                    st.closed = true;
                    st.pending.clear();
                    return Some((Err(e), st));
                }
                if st.finished && st.closed {
                    break;
                }
            }

            if st.closed && !st.finished {
                st.pending.clear();
                return Some((
                    Err(ExtractError::StreamInterrupted {
                        detail: "response body ended before the completion finished".into(),
                    }),
                    st,
                ));
            }
        }
    }))
}

// ── Hosted sessions ──────────────────────────────────────────────────────

/// The `threads` resource of an OpenAI-compatible or Azure account.
#[derive(Debug, Clone)]
pub struct OpenAiThreads {
    service: OpenAiService,
}

impl OpenAiThreads {
    fn threads_url(&self, id: Option<&str>) -> String {
        let suffix = id.map(|id| format!("/{id}")).unwrap_or_default();
        match &self.service.flavor {
            Flavor::OpenAi { base_url, .. } => format!("{base_url}/threads{suffix}"),
            Flavor::Azure { endpoint, .. } => format!(
                "{endpoint}/openai/threads{suffix}?api-version={AZURE_THREADS_API_VERSION}"
            ),
        }
    }

    fn request(&self, req: RequestBuilder) -> RequestBuilder {
        self.service
            .authorize(req)
            .header("OpenAI-Beta", "assistants=v2")
            .timeout(self.service.timeout)
    }

    fn unavailable(&self, e: &reqwest::Error) -> ExtractError {
        ExtractError::ServiceUnavailable {
            service: self.name().to_string(),
            detail: transport_detail(e),
        }
    }
}

#[async_trait]
impl SessionProvider for OpenAiThreads {
    fn name(&self) -> &str {
        self.service.name()
    }

    async fn create_session(&self) -> Result<SessionHandle, ExtractError> {
        #[derive(Deserialize)]
        struct Created {
            id: String,
        }

        let resp = self
            .request(self.service.client.post(self.threads_url(None)))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| self.unavailable(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(self.name(), status, &text));
        }

        let created: Created = resp.json().await.map_err(|e| self.unavailable(&e))?;
        Ok(SessionHandle::new(created.id))
    }

    async fn delete_session(&self, session: &SessionHandle) -> Result<(), ExtractError> {
        let resp = self
            .request(
                self.service
                    .client
                    .delete(self.threads_url(Some(session.id()))),
            )
            .send()
            .await
            .map_err(|e| self.unavailable(&e))?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(classify_status(self.name(), status, &text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::conversation::build_conversation;
    use crate::pipeline::llm::CompletionOptions;
    use crate::schema::pii_schema;
    use futures::stream;

    fn openai() -> OpenAiService {
        OpenAiService::openai("sk-test", "gpt-4o-mini").unwrap()
    }

    fn azure() -> OpenAiService {
        OpenAiService::azure(
            "https://contoso.openai.azure.com/",
            "pii-gpt4o",
            "azure-key",
            "2024-10-21",
        )
        .unwrap()
    }

    fn sse(parts: &[&str]) -> Vec<Result<Vec<u8>, String>> {
        parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect()
    }

    async fn collect(items: Vec<Result<Vec<u8>, String>>) -> Vec<Result<String, ExtractError>> {
        delta_stream(stream::iter(items)).collect().await
    }

    fn delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices":[{"index":0,"delta":{"content":text},"finish_reason":null}]})
        )
    }

    #[test]
    fn urls_per_flavour() {
        assert_eq!(
            openai().completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            openai().with_base_url("http://localhost:8080/v1/").completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            azure().completions_url(),
            "https://contoso.openai.azure.com/openai/deployments/pii-gpt4o/chat/completions?api-version=2024-10-21"
        );
        assert_eq!(
            azure().threads().threads_url(Some("thread_1")),
            "https://contoso.openai.azure.com/openai/threads/thread_1?api-version=2024-05-01-preview"
        );
    }

    #[test]
    fn azure_rejects_non_url_endpoint() {
        assert!(OpenAiService::azure("contoso", "d", "k", "v").is_err());
    }

    #[test]
    fn request_body_carries_image_schema_and_session() {
        let conversation = build_conversation(vec![1u8, 2, 3], "image/jpeg", "Find PII.");
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(512),
        };
        let session = SessionHandle::new("thread_abc");
        let request = CompletionRequest {
            conversation: &conversation,
            schema: pii_schema(),
            options: &options,
            session: Some(&session),
        };

        let body = openai().request_body(&request).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["user"], "thread_abc");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "Find PII.");

        let part = &body["messages"][1]["content"][0];
        assert_eq!(part["type"], "image_url");
        assert_eq!(part["image_url"]["detail"], "high");
        assert_eq!(part["image_url"]["url"], "data:image/jpeg;base64,AQID");

        let format = &body["response_format"];
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "PIIExtraction");
        assert_eq!(format["json_schema"]["strict"], true);

        let azure_body = azure().request_body(&request).unwrap();
        assert!(azure_body.get("model").is_none());
    }

    #[test]
    fn status_mapping() {
        let kind = |code: u16| {
            classify_status("openai", StatusCode::from_u16(code).unwrap(), "").kind()
        };
        assert_eq!(kind(401), ErrorKind::AuthRejected);
        assert_eq!(kind(403), ErrorKind::AuthRejected);
        assert_eq!(kind(400), ErrorKind::SchemaRejected);
        assert_eq!(kind(422), ErrorKind::SchemaRejected);
        assert_eq!(kind(429), ErrorKind::ServiceUnavailable);
        assert_eq!(kind(500), ErrorKind::ServiceUnavailable);
        assert_eq!(kind(503), ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn status_detail_uses_api_error_message() {
        let body = r#"{"error":{"message":"Invalid schema for response_format","type":"invalid_request_error"}}"#;
        let err = classify_status("azure", StatusCode::BAD_REQUEST, body);
        assert!(err.to_string().contains("Invalid schema for response_format"));
    }

    #[tokio::test]
    async fn deltas_in_order_until_done() {
        let first = delta("{\"name\":");
        let second = delta("\"Jane\"}");
        let items = sse(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            first.as_str(),
            &second[..10],
            &second[10..],
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ]);

        let out: Vec<String> = collect(items).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(out, vec!["{\"name\":", "\"Jane\"}"]);
    }

    #[tokio::test]
    async fn body_ending_without_completion_is_interrupted() {
        let first = delta("{\"name\":");
        let out = collect(sse(&[first.as_str()])).await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert_eq!(
            out[1].as_ref().unwrap_err().kind(),
            ErrorKind::StreamInterrupted
        );
    }

    #[tokio::test]
    async fn transport_error_is_interrupted() {
        let first = delta("{");
        let mut items = sse(&[first.as_str()]);
        items.push(Err("connection reset by peer".to_string()));
        let out = collect(items).await;
        assert!(out[0].is_ok());
        let err = out[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamInterrupted);
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn error_event_is_interrupted() {
        let out = collect(sse(&[
            "event: error\ndata: {\"error\":{\"message\":\"overloaded\"}}\n\n",
        ]))
        .await;
        let err = out[0].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamInterrupted);
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn finish_reason_without_done_marker_completes() {
        let first = delta("{}");
        let out = collect(sse(&[
            first.as_str(),
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        ]))
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), "{}");
    }

    #[tokio::test]
    async fn invalid_utf8_in_stream_is_interrupted() {
        let first = delta("{\"name\":");
        let mut items = sse(&[first.as_str()]);
        items.push(Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Ren\xe9\"}}]}\n\n".to_vec()));
        items.extend(sse(&["data: [DONE]\n\n"]));

        let out = collect(items).await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        let err = out[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamInterrupted);
        assert!(err.to_string().contains("invalid UTF-8"));
    }

    #[test]
    fn debug_redacts_key() {
        let dbg = format!("{:?}", azure());
        assert!(!dbg.contains("azure-key"));
        assert!(dbg.contains("<redacted>"));
    }
}
