//! Result types returned by the recognition entry points.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A successfully recognised formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaResult {
    /// The PNG that was recognised.
    pub path: PathBuf,
    /// Trimmed model reply: LaTeX source, or `Unrecognized`.
    pub latex: String,
    /// Wall-clock time for the whole call, including token acquisition.
    pub duration_ms: u64,
}

/// Outcome for one file of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub path: PathBuf,
    /// Recognised LaTeX, `None` if this file failed.
    pub latex: Option<String>,
    /// Error message, `None` if this file succeeded.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl BatchEntry {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of [`crate::convert::batch_png_to_latex`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutput {
    pub directory: PathBuf,
    /// One entry per PNG found, in processing order.
    pub entries: Vec<BatchEntry>,
    pub total_duration_ms: u64,
}

impl BatchOutput {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    /// True if the directory held no PNG files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ok: bool) -> BatchEntry {
        BatchEntry {
            path: "x.png".into(),
            latex: ok.then(|| "x".to_string()),
            error: (!ok).then(|| "boom".to_string()),
            duration_ms: 1,
        }
    }

    #[test]
    fn counts_split_success_and_failure() {
        let out = BatchOutput {
            directory: ".".into(),
            entries: vec![entry(true), entry(false), entry(true)],
            total_duration_ms: 3,
        };
        assert_eq!(out.succeeded(), 2);
        assert_eq!(out.failed(), 1);
        assert!(!out.is_empty());
    }

    #[test]
    fn serialises_to_json() {
        let out = BatchOutput {
            directory: "imgs".into(),
            entries: vec![entry(false)],
            total_duration_ms: 0,
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["entries"][0]["error"], "boom");
        assert!(json["entries"][0]["latex"].is_null());
    }
}
