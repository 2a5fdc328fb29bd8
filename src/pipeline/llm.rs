//! Extraction client: send the conversation plus the schema contract to a
//! model service and hand back the streamed completion.
//!
//! The client is thin. Prompt text lives in [`crate::prompts`],
//! the contract in [`crate::schema`], and wire details in [`crate::service`].
//! What lives here is the request/stream state machine:
//!
//! ```text
//! Idle ──▶ Requesting ──▶ Streaming ──▶ Complete
//!              │               │
//!              ▼               ▼
//!           Failed          Failed
//!  (ServiceUnavailable,  (StreamInterrupted)
//!   AuthRejected,
//!   SchemaRejected)
//! ```
//!
//! ## No retry
//!
//! Every invocation issues exactly one outbound request. Retry and backoff
//! are a caller concern layered above the pipeline; the failure kind is
//! surfaced unchanged so the caller can decide.

use crate::error::{ErrorKind, ExtractError};
use crate::pipeline::conversation::Conversation;
use crate::schema::OutputSchema;
use crate::session::SessionHandle;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::Stream;
use tracing::{debug, warn};

/// Raw text deltas as produced by a [`ModelService`].
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ExtractError>> + Send>>;

/// Sampling options forwarded to the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

/// Everything a service needs for one streamed, schema-constrained completion.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub conversation: &'a Conversation,
    pub schema: &'a OutputSchema,
    pub options: &'a CompletionOptions,
    /// Hosted session grouping related turns, when the caller holds one.
    pub session: Option<&'a SessionHandle>,
}

/// A chat-completion backend able to stream a schema-constrained response.
///
/// Implementations must classify request-time failures as
/// [`ExtractError::ServiceUnavailable`], [`ExtractError::AuthRejected`] or
/// [`ExtractError::SchemaRejected`], and must not retry.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Short provider name used in errors and logs.
    fn name(&self) -> &str;

    /// Open the request and return once the response stream has started.
    async fn stream_completion(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<DeltaStream, ExtractError>;
}

/// State of one completion.
///
/// A [`CompletionStream`] only exists once the request succeeded, so
/// [`CompletionStream::state`] reports `Streaming`, `Complete` or `Failed`.
/// `Idle` and `Requesting` appear in the client's debug logs; a request-time
/// failure (`Requesting → Failed`) is the `Err` returned by
/// [`ExtractionClient::extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Requesting,
    Streaming,
    Complete,
    Failed(ErrorKind),
}

/// One text fragment, tagged with its arrival position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub index: usize,
    pub text: String,
}

/// The lazy, finite, non-rewindable chunk sequence of one completion.
///
/// Any error after the stream has started is reported as
/// [`ExtractError::StreamInterrupted`] and ends the stream. Once complete or
/// failed, the stream only yields `None`.
pub struct CompletionStream {
    inner: DeltaStream,
    state: ClientState,
    next_index: usize,
}

impl CompletionStream {
    fn new(inner: DeltaStream) -> Self {
        Self {
            inner,
            state: ClientState::Streaming,
            next_index: 0,
        }
    }

    /// `Streaming` until the stream ends, then `Complete` or `Failed`.
    pub fn state(&self) -> ClientState {
        self.state
    }
}

impl Stream for CompletionStream {
    type Item = Result<StreamChunk, ExtractError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !matches!(this.state, ClientState::Streaming) {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(text))) => {
                let chunk = StreamChunk {
                    index: this.next_index,
                    text,
                };
                this.next_index += 1;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                let e = match e {
                    e @ ExtractError::StreamInterrupted { .. } => e,
                    other => ExtractError::StreamInterrupted {
                        detail: other.to_string(),
                    },
                };
                warn!("Stream failed after {} chunks: {}", this.next_index, e);
                this.state = ClientState::Failed(ErrorKind::StreamInterrupted);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                debug!("Stream complete after {} chunks", this.next_index);
                this.state = ClientState::Complete;
                Poll::Ready(None)
            }
        }
    }
}

/// Issues schema-constrained completion requests against an injected service.
///
/// Holds no per-request state: the same client can serve any number of
/// concurrent extractions.
#[derive(Clone)]
pub struct ExtractionClient {
    service: Arc<dyn ModelService>,
}

impl ExtractionClient {
    pub fn new(service: Arc<dyn ModelService>) -> Self {
        Self { service }
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Open one streamed completion.
    ///
    /// # Errors
    /// The request-time kinds: `ServiceUnavailable`, `AuthRejected`,
    /// `SchemaRejected`. Mid-stream failures surface from the returned
    /// stream instead.
    pub async fn extract(
        &self,
        conversation: &Conversation,
        schema: &OutputSchema,
        options: &CompletionOptions,
        session: Option<&SessionHandle>,
    ) -> Result<CompletionStream, ExtractError> {
        debug!(
            service = self.service.name(),
            turns = conversation.turns().len(),
            attachment_bytes = conversation.attachment_bytes(),
            "{:?} → {:?}",
            ClientState::Idle,
            ClientState::Requesting
        );

        let request = CompletionRequest {
            conversation,
            schema,
            options,
            session,
        };

        match self.service.stream_completion(request).await {
            Ok(inner) => {
                debug!("{:?} → {:?}", ClientState::Requesting, ClientState::Streaming);
                Ok(CompletionStream::new(inner))
            }
            Err(e) => {
                warn!(
                    "{:?} → {:?}: {}",
                    ClientState::Requesting,
                    ClientState::Failed(e.kind()),
                    e
                );
                Err(e)
            }
        }
    }
}
