//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`]. The CLI uses
//! it to drive a progress bar; [`crate::service::ConversionService`] uses it to
//! keep task progress current.
//!
//! # Example
//!
//! ```rust
//! use pagewise::{ChunkType, ConversionConfig, ConversionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     ocr_pages: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, _page: usize, _total: usize, kind: ChunkType, _chars: usize) {
//!         if kind == ChunkType::Ocr {
//!             self.ocr_pages.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { ocr_pages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ChunkType;
use std::sync::Arc;

/// Called by the page processor as it works through a document.
///
/// Pages run concurrently, so `on_page_*` may be called from several tasks at
/// once and in any page order. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after analysis, before any page is processed.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page's work begins.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page produced content.
    fn on_page_complete(
        &self,
        page_num: usize,
        total_pages: usize,
        chunk_type: ChunkType,
        content_len: usize,
    ) {
        let _ = (page_num, total_pages, chunk_type, content_len);
    }

    /// Called when a page ended as an error placeholder.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages have been attempted.
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        text_pages: AtomicUsize,
        ocr_pages: AtomicUsize,
        errors: AtomicUsize,
        succeeded: AtomicUsize,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page: usize, _total: usize, kind: ChunkType, _len: usize) {
            match kind {
                ChunkType::Text => self.text_pages.fetch_add(1, Ordering::SeqCst),
                _ => self.ocr_pages.fetch_add(1, Ordering::SeqCst),
            };
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_conversion_complete(&self, _total_pages: usize, success_count: usize) {
            self.succeeded.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_conversion_start(5);
        cb.on_page_start(1, 5);
        cb.on_page_complete(1, 5, ChunkType::Text, 42);
        cb.on_page_error(2, 5, "some error");
        cb.on_conversion_complete(5, 4);
    }

    #[test]
    fn tracking_callback_separates_routes() {
        let tracker = TrackingCallback::default();

        tracker.on_page_start(1, 3);
        tracker.on_page_complete(1, 3, ChunkType::Ocr, 100);
        tracker.on_page_start(2, 3);
        tracker.on_page_complete(2, 3, ChunkType::Text, 200);
        tracker.on_page_start(3, 3);
        tracker.on_page_error(3, 3, "provider down");
        tracker.on_conversion_complete(3, 2);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.ocr_pages.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.text_pages.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.succeeded.load(Ordering::SeqCst), 2);
    }
}
