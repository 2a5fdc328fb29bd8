//! Error types for the pii-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PiiError`] (**setup**): an extractor cannot be built at all (invalid
//!   configuration, no model provider configured). Returned as
//!   `Err(PiiError)` from constructors and the sync convenience wrapper.
//!
//! * [`ExtractError`] (**per extraction**): one pipeline stage failed for one
//!   document. Every variant maps to exactly one [`ErrorKind`]; at the
//!   pipeline boundary it is folded into
//!   [`crate::output::ExtractionResult::Failure`] so callers always receive a
//!   tagged result instead of an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Stable failure taxonomy exposed to callers.
///
/// The CLI (or any other shell) maps each kind to an actionable message;
/// raw transport errors never reach the user directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input path does not resolve to an existing readable file.
    NotFound,
    /// The model service could not be reached or refused to serve (5xx, 429, timeout).
    ServiceUnavailable,
    /// The service rejected the credentials (401/403).
    AuthRejected,
    /// The service rejected the request itself, typically the response schema (400/422).
    SchemaRejected,
    /// The connection failed after streaming had started.
    StreamInterrupted,
    /// The stream completed without producing any content.
    EmptyResponse,
    /// Content was produced but does not satisfy the output schema.
    SchemaViolation,
    /// The caller cancelled the extraction before the parser completed.
    Cancelled,
}

impl ErrorKind {
    /// Snake-case identifier, identical to the serialised form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::AuthRejected => "auth_rejected",
            ErrorKind::SchemaRejected => "schema_rejected",
            ErrorKind::StreamInterrupted => "stream_interrupted",
            ErrorKind::EmptyResponse => "empty_response",
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure in one stage of one extraction.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    // ── Ingest ────────────────────────────────────────────────────────────
    /// Input file was not found at the given path, or is not a regular file.
    #[error("File not found: '{path}'\nCheck the path exists and points to a file.")]
    NotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    // ── Request time ──────────────────────────────────────────────────────
    /// Transport failure, timeout, throttling or a 5xx before any data arrived.
    #[error("Model service '{service}' unavailable: {detail}")]
    ServiceUnavailable { service: String, detail: String },

    /// Authentication error (401/403); retrying with the same credentials will not help.
    #[error("Model service '{service}' rejected the credentials: {detail}")]
    AuthRejected { service: String, detail: String },

    /// The service refused the request (bad schema, bad attachment).
    #[error("Model service '{service}' rejected the request: {detail}")]
    SchemaRejected { service: String, detail: String },

    // ── Streaming ─────────────────────────────────────────────────────────
    /// The stream failed after it had started; any partial text is discarded.
    #[error("Response stream interrupted: {detail}")]
    StreamInterrupted { detail: String },

    // ── Parse ─────────────────────────────────────────────────────────────
    /// The stream finished with no content at all.
    #[error("Model returned an empty response")]
    EmptyResponse,

    /// The aggregated text does not satisfy the output schema.
    #[error("Response violates the output schema: {detail}")]
    SchemaViolation { detail: String, raw: String },

    // ── Caller ────────────────────────────────────────────────────────────
    /// The extraction was cancelled by the caller.
    #[error("Extraction cancelled")]
    Cancelled,
}

impl ExtractError {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::NotFound { .. } | ExtractError::PermissionDenied { .. } => {
                ErrorKind::NotFound
            }
            ExtractError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            ExtractError::AuthRejected { .. } => ErrorKind::AuthRejected,
            ExtractError::SchemaRejected { .. } => ErrorKind::SchemaRejected,
            ExtractError::StreamInterrupted { .. } => ErrorKind::StreamInterrupted,
            ExtractError::EmptyResponse => ErrorKind::EmptyResponse,
            ExtractError::SchemaViolation { .. } => ErrorKind::SchemaViolation,
            ExtractError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Raw model text attached to the error, if any.
    ///
    /// Only a schema violation carries text: stream failures discard their
    /// partial aggregation.
    pub fn raw_text(&self) -> &str {
        match self {
            ExtractError::SchemaViolation { raw, .. } => raw,
            _ => "",
        }
    }
}

/// Fatal setup errors: no extraction can be attempted.
#[derive(Debug, Error)]
pub enum PiiError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No model provider could be resolved (missing key, unknown provider name).
    #[error("Model provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}
