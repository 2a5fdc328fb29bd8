//! Extraction entry points.
//!
//! [`PiiExtractor`] exposes the four pipeline stages as ordinary methods
//! ([`ingest`](PiiExtractor::ingest),
//! [`build_conversation`](PiiExtractor::build_conversation),
//! [`extract`](PiiExtractor::extract), [`parse`](PiiExtractor::parse)) and
//! chains them in [`extract_file`](PiiExtractor::extract_file). Whatever
//! happens, the chained entry points return an [`ExtractionResult`]: stage
//! errors are folded into its `Failure` variant at this boundary.
//!
//! ## Why an extractor value?
//!
//! The model service is resolved once and injected explicitly. An extractor
//! holds no per-request state, so one instance can be shared (by reference or
//! inside an `Arc`) across any number of concurrent extractions.

use crate::config::{ExtractionConfig, DEFAULT_MODEL};
use crate::error::{ExtractError, PiiError};
use crate::output::ExtractionResult;
use crate::pipeline::aggregate::aggregate;
use crate::pipeline::conversation::{build_conversation, Conversation};
use crate::pipeline::input::{self, IngestedFile};
use crate::pipeline::llm::{ExtractionClient, ModelService};
use crate::pipeline::parse::parse_response;
use crate::progress::ExtractionProgressCallback;
use crate::prompts;
use crate::schema::{pii_schema, OutputSchema};
use crate::service::openai::{OpenAiService, OPENAI_BASE_URL};
use crate::session::{SessionHandle, SessionProvider};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Runs PII extractions against one model service.
pub struct PiiExtractor {
    client: ExtractionClient,
    schema: &'static OutputSchema,
    config: ExtractionConfig,
}

impl PiiExtractor {
    /// Build an extractor around an explicit service.
    ///
    /// `config.service` is ignored; the `service` argument wins.
    pub fn new(service: Arc<dyn ModelService>, config: ExtractionConfig) -> Self {
        Self {
            client: ExtractionClient::new(service),
            schema: pii_schema(),
            config,
        }
    }

    /// Build an extractor, resolving the service from `config` and the
    /// environment (see [`resolve_service`]).
    pub fn from_config(config: ExtractionConfig) -> Result<Self, PiiError> {
        let service = resolve_service(&config)?;
        debug!("Resolved model service '{}'", service.name());
        Ok(Self::new(service, config))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn service_name(&self) -> &str {
        self.client.service_name()
    }

    pub fn schema(&self) -> &OutputSchema {
        self.schema
    }

    fn progress(&self) -> Option<&dyn ExtractionProgressCallback> {
        self.config.progress_callback.as_deref()
    }

    // ── Stages ───────────────────────────────────────────────────────────

    /// Stage 1: read the file. A configured media type overrides the one
    /// derived from the extension.
    pub async fn ingest(&self, path: impl AsRef<Path>) -> Result<IngestedFile, ExtractError> {
        let mut file = input::ingest(path).await?;
        if let Some(ref media_type) = self.config.media_type {
            file.media_type = media_type.clone();
        }
        if let Some(cb) = self.progress() {
            cb.on_ingested(file.bytes.len());
        }
        Ok(file)
    }

    /// Stage 2: system instruction plus one user turn with the image.
    pub fn build_conversation(&self, file: IngestedFile) -> Conversation {
        let prompt = prompts::system_prompt(self.config.system_prompt.as_deref());
        build_conversation(file.bytes, file.media_type, prompt)
    }

    /// Stage 3: one streamed, schema-constrained completion, aggregated.
    ///
    /// # Errors
    /// Request-time kinds from the service, or `StreamInterrupted`.
    pub async fn extract(
        &self,
        conversation: &Conversation,
        session: Option<&SessionHandle>,
    ) -> Result<String, ExtractError> {
        if let Some(cb) = self.progress() {
            cb.on_request_start();
        }
        let options = self.config.completion_options();
        let chunks = self
            .client
            .extract(conversation, self.schema, &options, session)
            .await?;
        aggregate(chunks, self.progress()).await
    }

    /// Stage 4: validate and decode the aggregated text.
    pub fn parse(&self, text: &str) -> ExtractionResult {
        parse_response(text, self.schema)
    }

    // ── Chained entry points ─────────────────────────────────────────────

    /// Run the whole pipeline on one file.
    ///
    /// A missing file fails with `NotFound` before any network call.
    /// `session`, when given, is only borrowed for the duration of the call.
    pub async fn extract_file(
        &self,
        path: impl AsRef<Path>,
        session: Option<&SessionHandle>,
    ) -> ExtractionResult {
        let started = Instant::now();
        let result = match self.ingest(path).await {
            Ok(file) => {
                let conversation = self.build_conversation(file);
                self.run(&conversation, session).await
            }
            Err(e) => ExtractionResult::Failure(e.into()),
        };
        self.finish(result, started)
    }

    /// Run stages 3 and 4 on a conversation the caller already built.
    pub async fn extract_conversation(
        &self,
        conversation: &Conversation,
        session: Option<&SessionHandle>,
    ) -> ExtractionResult {
        let started = Instant::now();
        let result = self.run(conversation, session).await;
        self.finish(result, started)
    }

    /// [`extract_file`](Self::extract_file), abandoned as soon as `cancel`
    /// completes.
    ///
    /// Cancellation drops the in-flight request (releasing its connection)
    /// and any partial aggregation, and yields `Failure(Cancelled)`. It never
    /// produces a partial record.
    pub async fn extract_file_until<C>(
        &self,
        path: impl AsRef<Path>,
        session: Option<&SessionHandle>,
        cancel: C,
    ) -> ExtractionResult
    where
        C: Future,
    {
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = cancel => {
                debug!("Extraction cancelled after {}ms", started.elapsed().as_millis());
                self.finish(ExtractionResult::Failure(ExtractError::Cancelled.into()), started)
            }
            result = self.extract_file(path, session) => result,
        }
    }

    async fn run(
        &self,
        conversation: &Conversation,
        session: Option<&SessionHandle>,
    ) -> ExtractionResult {
        match self.extract(conversation, session).await {
            Ok(text) => self.parse(&text),
            Err(e) => ExtractionResult::Failure(e.into()),
        }
    }

    fn finish(&self, result: ExtractionResult, started: Instant) -> ExtractionResult {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            ExtractionResult::Success { record } => info!(
                "Extraction succeeded in {}ms: {}/{} fields populated",
                elapsed_ms,
                record.populated_count(),
                self.schema.properties().len()
            ),
            ExtractionResult::Failure(f) => {
                info!("Extraction failed in {}ms: {}", elapsed_ms, f.kind)
            }
        }
        if let Some(cb) = self.progress() {
            cb.on_complete(result.kind());
        }
        result
    }
}

/// Synchronous wrapper around [`PiiExtractor::extract_file`].
///
/// Creates a temporary tokio runtime internally; must not be called from
/// within an async context.
///
/// # Errors
/// Only setup failures; extraction failures are in the returned result.
pub fn extract_file_sync(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, PiiError> {
    let extractor = PiiExtractor::from_config(config.clone())?;
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| PiiError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
    Ok(runtime.block_on(extractor.extract_file(path, None)))
}

// ── Service resolution ───────────────────────────────────────────────────

/// Resolve the model service, from most-specific to least-specific.
///
/// 1. **Injected service** (`config.service`): used as-is. This is how tests
///    and callers with custom middleware plug in.
///
/// 2. **Named provider** (`config.provider_name`): `"openai"` or `"azure"`,
///    with any missing endpoint, deployment or key read from the
///    environment.
///
/// 3. **Azure environment pair** (`AZURE_OPENAI_ENDPOINT` +
///    `AZURE_OPENAI_CHAT_DEPLOYMENT`): both set means the execution
///    environment chose Azure.
///
/// 4. **OpenAI key** (`config.api_key` or `OPENAI_API_KEY`).
///
/// Otherwise [`PiiError::ProviderNotConfigured`].
pub fn resolve_service(config: &ExtractionConfig) -> Result<Arc<dyn ModelService>, PiiError> {
    if let Some(ref service) = config.service {
        return Ok(Arc::clone(service));
    }
    Ok(Arc::new(resolve_http_service(config)?))
}

/// Resolve the hosted-session provider matching the configured service.
///
/// # Errors
/// [`PiiError::InvalidConfig`] when the service was injected: an arbitrary
/// [`ModelService`] has no known session resource.
pub fn resolve_session_provider(
    config: &ExtractionConfig,
) -> Result<Arc<dyn SessionProvider>, PiiError> {
    if config.service.is_some() {
        return Err(PiiError::InvalidConfig(
            "hosted sessions require a provider-backed service, not an injected one".into(),
        ));
    }
    Ok(Arc::new(resolve_http_service(config)?.threads()))
}

fn resolve_http_service(config: &ExtractionConfig) -> Result<OpenAiService, PiiError> {
    if let Some(ref name) = config.provider_name {
        return match name.as_str() {
            "azure" => azure_service(config),
            "openai" => openai_service(config),
            other => Err(PiiError::ProviderNotConfigured {
                provider: other.to_string(),
                hint: "Supported providers: openai, azure".into(),
            }),
        };
    }

    if env_var("AZURE_OPENAI_ENDPOINT").is_some()
        && env_var("AZURE_OPENAI_CHAT_DEPLOYMENT").is_some()
    {
        return azure_service(config);
    }

    if config.api_key.is_some() || env_var("OPENAI_API_KEY").is_some() {
        return openai_service(config);
    }

    Err(PiiError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: "No model provider could be detected from the environment.\n\
               Set OPENAI_API_KEY, or AZURE_OPENAI_ENDPOINT + AZURE_OPENAI_CHAT_DEPLOYMENT \
               + AZURE_OPENAI_API_KEY, or pass --provider."
            .to_string(),
    })
}

fn azure_service(config: &ExtractionConfig) -> Result<OpenAiService, PiiError> {
    let missing = |what: &str, var: &str, flag: &str| PiiError::ProviderNotConfigured {
        provider: "azure".to_string(),
        hint: format!("No {what}: set {var} or pass {flag}."),
    };

    let endpoint = config
        .endpoint
        .clone()
        .or_else(|| env_var("AZURE_OPENAI_ENDPOINT"))
        .ok_or_else(|| missing("endpoint", "AZURE_OPENAI_ENDPOINT", "--endpoint"))?;
    let deployment = config
        .model
        .clone()
        .or_else(|| env_var("AZURE_OPENAI_CHAT_DEPLOYMENT"))
        .ok_or_else(|| missing("deployment", "AZURE_OPENAI_CHAT_DEPLOYMENT", "--model"))?;
    let api_key = config
        .api_key
        .clone()
        .or_else(|| env_var("AZURE_OPENAI_API_KEY"))
        .ok_or_else(|| missing("API key", "AZURE_OPENAI_API_KEY", "--api-key"))?;

    Ok(
        OpenAiService::azure(endpoint, deployment, api_key, config.api_version.clone())?
            .with_timeout(Duration::from_secs(config.api_timeout_secs)),
    )
}

fn openai_service(config: &ExtractionConfig) -> Result<OpenAiService, PiiError> {
    let api_key = config
        .api_key
        .clone()
        .or_else(|| env_var("OPENAI_API_KEY"))
        .ok_or_else(|| PiiError::ProviderNotConfigured {
            provider: "openai".to_string(),
            hint: "No API key: set OPENAI_API_KEY or pass --api-key.".to_string(),
        })?;
    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    let base_url = config
        .endpoint
        .clone()
        .or_else(|| env_var("OPENAI_BASE_URL"))
        .unwrap_or_else(|| OPENAI_BASE_URL.to_string());

    Ok(OpenAiService::openai(api_key, model)?
        .with_base_url(base_url)
        .with_timeout(Duration::from_secs(config.api_timeout_secs)))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::llm::{CompletionRequest, DeltaStream};
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    /// Replays fixed deltas and remembers the last request's shape.
    struct EchoService {
        deltas: Vec<&'static str>,
        seen: Mutex<Option<(String, String, Option<String>)>>,
    }

    #[async_trait]
    impl ModelService for EchoService {
        fn name(&self) -> &str {
            "echo"
        }

        async fn stream_completion(
            &self,
            request: CompletionRequest<'_>,
        ) -> Result<DeltaStream, ExtractError> {
            let media_type = request.conversation.turns()[1]
                .images()
                .next()
                .map(|i| i.media_type.clone())
                .unwrap_or_default();
            *self.seen.lock().unwrap() = Some((
                request.conversation.system_prompt(),
                media_type,
                request.session.map(|s| s.id().to_string()),
            ));
            let items: Vec<Result<String, ExtractError>> =
                self.deltas.iter().map(|d| Ok(d.to_string())).collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn echo(deltas: Vec<&'static str>) -> Arc<EchoService> {
        Arc::new(EchoService {
            deltas,
            seen: Mutex::new(None),
        })
    }

    #[tokio::test]
    async fn config_overrides_reach_the_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let service = echo(vec!["{}"]);
        let config = ExtractionConfig::builder()
            .system_prompt("Only emails.")
            .media_type("image/webp")
            .build()
            .unwrap();
        let extractor = PiiExtractor::new(service.clone(), config);
        let session = SessionHandle::new("thread_9");

        let result = extractor.extract_file(&path, Some(&session)).await;
        assert_eq!(result.kind(), Some(ErrorKind::SchemaViolation));

        let seen = service.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.0, "Only emails.");
        assert_eq!(seen.1, "image/webp");
        assert_eq!(seen.2.as_deref(), Some("thread_9"));
    }

    #[tokio::test]
    async fn stages_compose_like_extract_conversation() {
        let extractor = PiiExtractor::new(
            echo(vec![
                "{\"name\":\"A\",\"company_email\":\"\",\"personal_email\":\"\",",
                "\"personal_phone_number\":\"\",\"company_phone_number\":\"\",",
                "\"personal_address\":\"\",\"company_ship_to_address\":\"\",",
                "\"company_ship_from_address\":\"\"}",
            ]),
            ExtractionConfig::default(),
        );
        let conversation = build_conversation(vec![0u8], "image/png", "x");

        let text = extractor.extract(&conversation, None).await.unwrap();
        let staged = extractor.parse(&text);
        let chained = extractor.extract_conversation(&conversation, None).await;
        assert_eq!(staged, chained);
        assert_eq!(chained.record().unwrap().name.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn cancellation_wins_over_a_stalled_service() {
        struct Stalled;

        #[async_trait]
        impl ModelService for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }

            async fn stream_completion(
                &self,
                _request: CompletionRequest<'_>,
            ) -> Result<DeltaStream, ExtractError> {
                Ok(Box::pin(stream::pending()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, [0u8; 4]).unwrap();

        let extractor = PiiExtractor::new(Arc::new(Stalled), ExtractionConfig::default());
        let result = extractor
            .extract_file_until(&path, None, tokio::time::sleep(Duration::from_millis(20)))
            .await;
        assert_eq!(result.kind(), Some(ErrorKind::Cancelled));
        assert!(result.record().is_none());
    }

    #[test]
    fn injected_service_wins_resolution() {
        let config = ExtractionConfig::builder()
            .provider_name("azure")
            .service(echo(vec![]))
            .build()
            .unwrap();
        assert_eq!(resolve_service(&config).unwrap().name(), "echo");
        assert!(resolve_session_provider(&config).is_err());
    }

    #[test]
    fn named_providers_resolve_from_explicit_settings() {
        let azure = ExtractionConfig::builder()
            .provider_name("azure")
            .endpoint("https://contoso.openai.azure.com")
            .model("pii-deployment")
            .api_key("k")
            .build()
            .unwrap();
        let service = resolve_service(&azure).unwrap();
        assert_eq!(service.name(), "azure");

        let openai = ExtractionConfig::builder()
            .provider_name("openai")
            .api_key("sk-test")
            .build()
            .unwrap();
        assert_eq!(resolve_service(&openai).unwrap().name(), "openai");
        assert_eq!(resolve_session_provider(&openai).unwrap().name(), "openai");
    }
}
