//! Progress-callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::RecognizerConfigBuilder::progress_callback`] to be told
//! about each file as [`crate::convert::batch_png_to_latex`] works through a
//! directory. The CLI uses this to print each result the moment it arrives
//! instead of waiting for the whole batch.
//!
//! # Example
//!
//! ```rust
//! use edgequake_formula::{BatchProgressCallback, RecognizerConfig};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, index: usize, total: usize, path: &Path, latex: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {}: {}", index, total, path.display(), latex);
//!     }
//! }
//!
//! let config = RecognizerConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the batch driver as it processes each file.
///
/// Files are processed strictly one after another, so calls never overlap.
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after the directory has been listed.
    ///
    /// `total_files` may be 0, in which case no per-file events follow.
    fn on_batch_start(&self, directory: &Path, total_files: usize) {
        let _ = (directory, total_files);
    }

    /// Called just before a file is read and sent to the model.
    ///
    /// # Arguments
    /// * `index` — 1-indexed position in the batch
    /// * `total` — number of files in the batch
    fn on_file_start(&self, index: usize, total: usize, path: &Path) {
        let _ = (index, total, path);
    }

    /// Called when a file is recognised.
    fn on_file_complete(&self, index: usize, total: usize, path: &Path, latex: &str) {
        let _ = (index, total, path, latex);
    }

    /// Called when a file fails; the batch continues with the next file.
    fn on_file_error(&self, index: usize, total: usize, path: &Path, error: &str) {
        let _ = (index, total, path, error);
    }

    /// Called once after every file has been attempted.
    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let _ = (total_files, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RecognizerConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let p = Path::new("a.png");
        cb.on_batch_start(Path::new("."), 2);
        cb.on_file_start(1, 2, p);
        cb.on_file_complete(1, 2, p, "x");
        cb.on_file_error(2, 2, p, "some error");
        cb.on_batch_complete(2, 1);
    }
}
