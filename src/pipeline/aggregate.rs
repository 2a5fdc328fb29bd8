//! Response aggregation: fold the chunk stream into one candidate JSON text.
//!
//! A single loop awaits each chunk in turn. Concatenation follows arrival
//! order exactly, empty chunks are skipped without inserting anything, and a
//! failure part-way through discards everything gathered so far: a partial
//! JSON prefix is never handed to the parser.

use crate::error::ExtractError;
use crate::pipeline::llm::StreamChunk;
use crate::progress::ExtractionProgressCallback;
use futures::{Stream, StreamExt};
use tracing::debug;

/// Consume `chunks` to exhaustion and return their concatenation.
///
/// # Errors
/// [`ExtractError::StreamInterrupted`] if the stream yields an error; the
/// partial text is dropped.
pub async fn aggregate<S>(
    chunks: S,
    progress: Option<&dyn ExtractionProgressCallback>,
) -> Result<String, ExtractError>
where
    S: Stream<Item = Result<StreamChunk, ExtractError>>,
{
    futures::pin_mut!(chunks);

    let mut text = String::new();
    let mut received = 0usize;

    while let Some(item) = chunks.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(
                    "Discarding {} aggregated bytes after stream failure",
                    text.len()
                );
                return Err(match e {
                    e @ ExtractError::StreamInterrupted { .. } => e,
                    other => ExtractError::StreamInterrupted {
                        detail: other.to_string(),
                    },
                });
            }
        };

        if chunk.text.is_empty() {
            continue;
        }

        received += 1;
        text.push_str(&chunk.text);
        if let Some(cb) = progress {
            cb.on_chunk(chunk.text.len(), text.len());
        }
    }

    debug!("Aggregated {} bytes from {} non-empty chunks", text.len(), received);
    Ok(text)
}
