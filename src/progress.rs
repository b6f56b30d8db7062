//! Progress-callback trait for per-item pipeline events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! real-time events as the dispatcher works through the batch.
//!
//! A trait object keeps the library ignorant of how the host application
//! reports progress: the CLI drives an `indicatif` bar from these events, a
//! service might forward them to a channel or a metrics sink. The trait is
//! `Send + Sync` because items complete concurrently.
//!
//! # Example
//!
//! ```rust
//! use pagesift::{RunProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, identity: &str, done: usize, total: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{done}/{total} {identity}");
//!     }
//! }
//!
//! let counter: Arc<dyn RunProgressCallback> = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the dispatcher as it processes each work item.
///
/// Implementations must be `Send + Sync`; item events may arrive concurrently
/// from different workers. All methods have default no-op implementations so
/// callers only override what they care about.
pub trait RunProgressCallback: Send + Sync {
    /// Called once before any item is dispatched.
    fn on_run_start(&self, total_items: usize, skipped_items: usize) {
        let _ = (total_items, skipped_items);
    }

    /// Called just before an item's inference request is sent.
    fn on_item_start(&self, identity: &str) {
        let _ = identity;
    }

    /// Called when an item's record has been persisted.
    ///
    /// `done` counts every item decided so far, successes and failures alike.
    fn on_item_complete(&self, identity: &str, done: usize, total: usize) {
        let _ = (identity, done, total);
    }

    /// Called when an item fails for this run (transport error or an
    /// unrecoverable reply).
    fn on_item_error(&self, identity: &str, error: &str, done: usize, total: usize) {
        let _ = (identity, error, done, total);
    }

    /// Called once after every candidate has been attempted.
    fn on_run_complete(&self, total_items: usize, success_count: usize, failure_count: usize) {
        let _ = (total_items, success_count, failure_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        final_successes: AtomicUsize,
    }

    impl RunProgressCallback for TrackingCallback {
        fn on_item_start(&self, _identity: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _identity: &str, _done: usize, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _identity: &str, _error: &str, _done: usize, _total: usize) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_complete(&self, _total: usize, success_count: usize, _failure_count: usize) {
            self.final_successes.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(5, 2);
        cb.on_item_start("a/b.jpg");
        cb.on_item_complete("a/b.jpg", 1, 5);
        cb.on_item_error("a/c.jpg", "timeout", 2, 5);
        cb.on_run_complete(5, 4, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            starts: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            final_successes: AtomicUsize::new(0),
        };

        tracker.on_item_start("p1.jpg");
        tracker.on_item_complete("p1.jpg", 1, 3);
        tracker.on_item_start("p2.jpg");
        tracker.on_item_complete("p2.jpg", 2, 3);
        tracker.on_item_start("p3.jpg");
        tracker.on_item_error("p3.jpg", "API timeout", 3, 3);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);

        tracker.on_run_complete(3, 2, 1);
        assert_eq!(tracker.final_successes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn RunProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_run_start(10, 0);
        cb.on_item_complete("x.png", 1, 10);
    }
}
