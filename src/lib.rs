//! # pii-extract
//!
//! Extract Personally Identifiable Information (PII) from document images
//! using a vision-capable language model constrained to a strict JSON schema.
//!
//! ## Why this crate?
//!
//! Regex and NER pipelines over OCR output break on scanned forms, shipping
//! labels and business cards: the text comes out of reading order and the
//! labels ("Ship To", "Personal") that give a value its meaning are lost.
//! Instead this crate hands the image to a vision model and lets the service
//! enforce the output shape through schema-constrained decoding, so every
//! response is either a complete record or a tagged failure.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image file
//!  │
//!  ├─ 1. Ingest        read bytes, declare media type (no decoding)
//!  ├─ 2. Conversation  system instruction + one user turn with the image
//!  ├─ 3. Extract       one streamed completion, strict json_schema contract
//!  ├─ 4. Aggregate     concatenate deltas in arrival order
//!  └─ 5. Parse         validate against the schema → PiiRecord
//! ```
//!
//! Every failure short-circuits the rest and is returned as
//! [`ExtractionResult::Failure`] tagged with an [`ErrorKind`]. Nothing is
//! retried.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pii_extract::{ExtractionConfig, ExtractionResult, PiiExtractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY or the AZURE_OPENAI_* variables
//!     let extractor = PiiExtractor::from_config(ExtractionConfig::default())?;
//!     match extractor.extract_file("invoice.png", None).await {
//!         ExtractionResult::Success { record } => {
//!             println!("{}", serde_json::to_string_pretty(&record)?);
//!         }
//!         ExtractionResult::Failure(f) => eprintln!("{}: {}", f.kind, f.detail),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Hosted Sessions
//!
//! Wrap related extractions in a [`SessionGuard`] (or [`session::with_session`])
//! to group them under a server-side session that is deleted on every exit
//! path, including cancellation.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pii-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pii-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;
pub mod service;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ErrorKind, ExtractError, PiiError};
pub use extract::{extract_file_sync, resolve_service, resolve_session_provider, PiiExtractor};
pub use output::{ExtractionFailure, ExtractionResult, PiiRecord};
pub use pipeline::conversation::Conversation;
pub use pipeline::llm::ModelService;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{pii_schema, OutputSchema};
pub use service::{OpenAiService, OpenAiThreads};
pub use session::{SessionGuard, SessionHandle, SessionProvider};
