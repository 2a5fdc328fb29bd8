//! Result parsing: aggregated text → validated [`PiiRecord`].
//!
//! Validation is driven by the [`OutputSchema`] rather than by serde alone:
//! `Option` fields would let serde silently accept a missing key, while the
//! strict contract requires every key to be present. The schema check runs
//! first; decoding into the record only happens once the object is known to
//! match.

use crate::error::ExtractError;
use crate::output::{ExtractionResult, PiiRecord};
use crate::schema::OutputSchema;
use serde_json::Value;
use tracing::debug;

/// Parse aggregated model output into a tagged result.
///
/// Never panics and never returns an error: every outcome is an
/// [`ExtractionResult`].
pub fn parse_response(text: &str, schema: &OutputSchema) -> ExtractionResult {
    decode_record(text, schema).into()
}

/// Parse aggregated model output into a record or a stage error.
///
/// # Errors
/// * [`ExtractError::EmptyResponse`]: `text` is empty or whitespace only.
/// * [`ExtractError::SchemaViolation`]: malformed JSON, a missing required
///   key, an unknown key under a closed schema, or a non-string value. The
///   original text is kept in the error.
pub fn decode_record(text: &str, schema: &OutputSchema) -> Result<PiiRecord, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::EmptyResponse);
    }

    let violation = |detail: String| ExtractError::SchemaViolation {
        detail,
        raw: text.to_string(),
    };

    let value: Value =
        serde_json::from_str(text).map_err(|e| violation(format!("malformed JSON: {e}")))?;

    if let Err(problems) = schema.validate(&value) {
        let detail = problems
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        debug!("Schema validation failed: {} problem(s)", problems.len());
        return Err(violation(detail));
    }

    serde_json::from_value(value).map_err(|e| violation(format!("record decode failed: {e}")))
}
