//! Output types: the extracted record and the tagged extraction outcome.

use crate::error::{ErrorKind, ExtractError};
use crate::schema::PII_FIELDS;
use serde::{Deserialize, Serialize};

/// The PII found in one document.
///
/// Every field is optional: `None` means the model reported the value as
/// absent from the document, which is never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PiiRecord {
    pub name: Option<String>,
    pub company_email: Option<String>,
    pub personal_email: Option<String>,
    pub personal_phone_number: Option<String>,
    pub company_phone_number: Option<String>,
    pub personal_address: Option<String>,
    pub company_ship_to_address: Option<String>,
    pub company_ship_from_address: Option<String>,
}

impl PiiRecord {
    /// Look a field up by its schema name.
    pub fn get(&self, field: &str) -> Option<&str> {
        let value = match field {
            "name" => &self.name,
            "company_email" => &self.company_email,
            "personal_email" => &self.personal_email,
            "personal_phone_number" => &self.personal_phone_number,
            "company_phone_number" => &self.company_phone_number,
            "personal_address" => &self.personal_address,
            "company_ship_to_address" => &self.company_ship_to_address,
            "company_ship_from_address" => &self.company_ship_from_address,
            _ => return None,
        };
        value.as_deref()
    }

    /// `(field, value)` pairs in schema order, including absent fields.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, Option<&str>)> + '_ {
        PII_FIELDS.iter().map(move |f| (*f, self.get(f)))
    }

    /// Number of fields with a non-empty value.
    pub fn populated_count(&self) -> usize {
        self.fields()
            .filter(|(_, v)| v.is_some_and(|s| !s.trim().is_empty()))
            .count()
    }
}

/// Why an extraction produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub kind: ErrorKind,
    /// The aggregated model text when one exists (schema violations), else empty.
    pub raw: String,
    /// Human-readable description; never contains transport internals beyond status/reason.
    pub detail: String,
}

impl From<ExtractError> for ExtractionFailure {
    fn from(e: ExtractError) -> Self {
        Self {
            kind: e.kind(),
            raw: e.raw_text().to_string(),
            detail: e.to_string(),
        }
    }
}

/// Tagged outcome of one extraction. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionResult {
    Success { record: PiiRecord },
    Failure(ExtractionFailure),
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionResult::Success { .. })
    }

    pub fn record(&self) -> Option<&PiiRecord> {
        match self {
            ExtractionResult::Success { record } => Some(record),
            ExtractionResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ExtractionFailure> {
        match self {
            ExtractionResult::Success { .. } => None,
            ExtractionResult::Failure(f) => Some(f),
        }
    }

    /// The failure kind, or `None` on success.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.failure().map(|f| f.kind)
    }

    /// Convert into a `Result` for callers that prefer `?`.
    pub fn into_result(self) -> Result<PiiRecord, ExtractionFailure> {
        match self {
            ExtractionResult::Success { record } => Ok(record),
            ExtractionResult::Failure(f) => Err(f),
        }
    }
}

impl From<Result<PiiRecord, ExtractError>> for ExtractionResult {
    fn from(r: Result<PiiRecord, ExtractError>) -> Self {
        match r {
            Ok(record) => ExtractionResult::Success { record },
            Err(e) => ExtractionResult::Failure(e.into()),
        }
    }
}
