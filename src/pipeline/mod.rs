//! Pipeline stages for PII extraction.
//!
//! Each submodule implements exactly one transformation step, and each can
//! be tested without the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ conversation ──▶ llm ──▶ aggregate ──▶ parse
//! (path)    (turns+image)   (stream)  (JSON text)  (record)
//! ```
//!
//! 1. [`input`]: read the file; the only stage touching the file system
//! 2. [`conversation`]: system instruction + one user turn with the image
//! 3. [`llm`]: one streamed, schema-constrained completion; the only
//!    stage with network I/O ([`encode`] prepares the attachment for the wire)
//! 4. [`aggregate`]: concatenate deltas in arrival order
//! 5. [`parse`]: validate against the schema and decode the record
//!
//! Any stage failing short-circuits the rest.

pub mod aggregate;
pub mod conversation;
pub mod encode;
pub mod input;
pub mod llm;
pub mod parse;
