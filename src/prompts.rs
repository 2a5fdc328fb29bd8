//! Instruction text sent to the model.
//!
//! Callers can override the default via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constant here is
//! used only when no override is provided.

/// Default system instruction for PII extraction.
///
/// The output shape is enforced by the strict response
/// schema, not by prose in the prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "Extract any Personally Identifiable Information (PII) in files you receive.";

/// Resolve the instruction to use for a request.
pub fn system_prompt(override_prompt: Option<&str>) -> &str {
    match override_prompt {
        Some(p) if !p.trim().is_empty() => p,
        _ => DEFAULT_SYSTEM_PROMPT,
    }
}
