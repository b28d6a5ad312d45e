//! Progress-callback trait for batch and per-stage events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as documents move through the pipeline.
//!
//! Events can be forwarded to a channel, a progress bar or a job table; the
//! library does not care. The trait is `Send + Sync` because documents in a
//! batch run concurrently.
//!
//! # Example
//!
//! ```rust
//! use water_bill_extract::{BatchProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, index: usize, file_name: &str, bill_count: usize) {
//!         let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("#{index} {file_name}: {bill_count} bills ({done} done)");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::workflow::Stage;
use std::sync::Arc;

/// Called by the batch entry points and the workflow as work progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is the document's 0-based position in the
/// batch input.
///
/// # Thread safety
///
/// Documents run concurrently, so every method may be called from several
/// tasks at once. Protect shared mutable state with `Mutex` or atomics.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any document starts.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document enters the pipeline.
    fn on_document_start(&self, index: usize, file_name: &str) {
        let _ = (index, file_name);
    }

    /// Called after each workflow stage finishes for a document.
    fn on_stage_complete(&self, index: usize, stage: Stage) {
        let _ = (index, stage);
    }

    /// Called when a document produced its bills.
    fn on_document_complete(&self, index: usize, file_name: &str, bill_count: usize) {
        let _ = (index, file_name, bill_count);
    }

    /// Called when a document failed.
    ///
    /// * `stage`: the failing stage, when the failure came from one
    fn on_document_error(&self, index: usize, file_name: &str, stage: Option<Stage>, error: &str) {
        let _ = (index, file_name, stage, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        stages: Mutex<Vec<Stage>>,
        errors: AtomicUsize,
        successes: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_stage_complete(&self, _index: usize, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_document_error(
            &self,
            _index: usize,
            _file_name: &str,
            _stage: Option<Stage>,
            _error: &str,
        ) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, success_count: usize) {
            self.successes.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start(0, "a.pdf");
        cb.on_stage_complete(0, Stage::ExtractContent);
        cb.on_document_complete(0, "a.pdf", 1);
        cb.on_document_error(1, "b.pdf", Some(Stage::SingleBill), "boom");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_stage_complete(0, Stage::ExtractContent);
        tracker.on_stage_complete(0, Stage::CheckMultipleBills);
        tracker.on_document_error(1, "b.pdf", None, "not a PDF");
        tracker.on_batch_complete(2, 1);

        assert_eq!(
            *tracker.stages.lock().unwrap(),
            vec![Stage::ExtractContent, Stage::CheckMultipleBills]
        );
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.successes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_document_start(3, "x.pdf");
    }
}
