//! Progress-callback trait for extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its stages. Events carry only sizes
//! and outcomes, never document bytes or extracted values, so forwarding them
//! to a terminal, a socket or a log is always safe.
//!
//! # Example
//!
//! ```rust
//! use pii_extract::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct ByteCounter {
//!     received: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for ByteCounter {
//!     fn on_chunk(&self, len: usize, _total: usize) {
//!         self.received.fetch_add(len, Ordering::Relaxed);
//!     }
//! }
//!
//! let counter = Arc::new(ByteCounter { received: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ErrorKind;
use std::sync::Arc;

/// Called by the pipeline as one extraction progresses.
///
/// Implementations must be `Send + Sync`: independent extractions may run on
/// different tasks and share one callback. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// The input file was read.
    fn on_ingested(&self, bytes: usize) {
        let _ = bytes;
    }

    /// The completion request is about to be sent.
    fn on_request_start(&self) {}

    /// A non-empty chunk arrived.
    ///
    /// # Arguments
    /// * `len`: byte length of this chunk
    /// * `total`: bytes aggregated so far, including this chunk
    fn on_chunk(&self, len: usize, total: usize) {
        let _ = (len, total);
    }

    /// The extraction finished, successfully or not.
    ///
    /// # Arguments
    /// * `outcome`: `None` on success, the failure kind otherwise
    fn on_complete(&self, outcome: Option<ErrorKind>) {
        let _ = outcome;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
