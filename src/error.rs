//! Error types for the edgequake-formula library.
//!
//! Every fallible operation returns [`FormulaError`]. The variants are
//! grouped into four families that callers usually care about, exposed via
//! [`FormulaError::kind`]:
//!
//! * [`ErrorKind::NotFound`] — an input file or directory does not exist.
//! * [`ErrorKind::Configuration`] — endpoint/deployment missing, bad scale, …
//! * [`ErrorKind::RenderingFailure`] — the SVG could not be rasterised.
//! * [`ErrorKind::RemoteServiceFailure`] — auth, network or model-side error.
//!
//! Local read/write failures that are none of the above map to
//! [`ErrorKind::Io`].

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`FormulaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    NotFound,
    Configuration,
    RenderingFailure,
    RemoteServiceFailure,
    Io,
}

/// All errors returned by the edgequake-formula library.
#[derive(Debug, Error)]
pub enum FormulaError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Batch input directory does not exist or is not a directory.
    #[error("Directory not found: '{path}'")]
    DirectoryNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading an input file failed for a reason other than absence.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// The SVG document could not be parsed.
    #[error("Invalid SVG '{path}': {detail}")]
    InvalidSvg { path: PathBuf, detail: String },

    /// The SVG parsed but could not be rasterised (e.g. zero-size canvas).
    #[error("Rasterisation failed for '{path}': {detail}")]
    RasterisationFailed { path: PathBuf, detail: String },

    // ── Remote service errors ─────────────────────────────────────────────
    /// No bearer token could be obtained from any ambient identity source.
    #[error("No Azure credential available.\n{detail}")]
    CredentialUnavailable { detail: String },

    /// The HTTP request could not be sent or its response body not read.
    #[error("Request to '{url}' failed: {detail}")]
    RequestFailed { url: String, detail: String },

    /// The service rejected the bearer token (401/403).
    #[error("Authentication error from '{endpoint}' (HTTP {status}): {detail}")]
    AuthError {
        endpoint: String,
        status: u16,
        detail: String,
    },

    /// The service returned HTTP 429.
    #[error("Rate limit exceeded for deployment '{deployment}'")]
    RateLimitExceeded {
        deployment: String,
        retry_after_secs: Option<u64>,
    },

    /// The service returned any other non-success status.
    #[error("LLM API error (HTTP {status}): {message}")]
    LlmApiError { status: u16, message: String },

    /// The service answered 2xx but without a usable choice.
    #[error("LLM response contained no content")]
    EmptyResponse,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output PNG file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Endpoint and/or deployment could not be resolved.
    #[error(
        "Missing Azure OpenAI configuration: {missing}.\n\
Pass --endpoint/--model or set AZURE_OPENAI_ENDPOINT and AZURE_OPENAI_DEPLOYMENT \
(a .env file in the working directory is read automatically)."
    )]
    MissingConfiguration { missing: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FormulaError {
    /// Classify the error into one of the coarse [`ErrorKind`] families.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormulaError::FileNotFound { .. } | FormulaError::DirectoryNotFound { .. } => {
                ErrorKind::NotFound
            }
            FormulaError::MissingConfiguration { .. } | FormulaError::InvalidConfig(_) => {
                ErrorKind::Configuration
            }
            FormulaError::InvalidSvg { .. } | FormulaError::RasterisationFailed { .. } => {
                ErrorKind::RenderingFailure
            }
            FormulaError::CredentialUnavailable { .. }
            | FormulaError::RequestFailed { .. }
            | FormulaError::AuthError { .. }
            | FormulaError::RateLimitExceeded { .. }
            | FormulaError::LlmApiError { .. }
            | FormulaError::EmptyResponse => ErrorKind::RemoteServiceFailure,
            FormulaError::PermissionDenied { .. }
            | FormulaError::ReadFailed { .. }
            | FormulaError::OutputWriteFailed { .. }
            | FormulaError::Internal(_) => ErrorKind::Io,
        }
    }

    /// Map a failed `std::fs` read of `path` to the most specific variant.
    pub(crate) fn from_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => FormulaError::FileNotFound { path },
            std::io::ErrorKind::PermissionDenied => FormulaError::PermissionDenied { path },
            _ => FormulaError::ReadFailed { path, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_configuration_display() {
        let e = FormulaError::MissingConfiguration {
            missing: "endpoint".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("endpoint"), "got: {msg}");
        assert!(msg.contains("AZURE_OPENAI_ENDPOINT"), "got: {msg}");
        assert_eq!(e.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn rate_limit_is_remote_failure() {
        let e = FormulaError::RateLimitExceeded {
            deployment: "gpt-4o".into(),
            retry_after_secs: Some(30),
        };
        assert!(e.to_string().contains("gpt-4o"));
        assert_eq!(e.kind(), ErrorKind::RemoteServiceFailure);
    }

    #[test]
    fn auth_error_display() {
        let e = FormulaError::AuthError {
            endpoint: "https://example.openai.azure.com".into(),
            status: 401,
            detail: "token expired".into(),
        };
        assert!(e.to_string().contains("401"));
        assert!(e.to_string().contains("token expired"));
    }

    #[test]
    fn from_read_maps_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e = FormulaError::from_read("/tmp/x.png", io);
        assert!(matches!(e, FormulaError::FileNotFound { .. }));
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn from_read_keeps_other_io_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad");
        let e = FormulaError::from_read("/tmp/x.png", io);
        assert!(matches!(e, FormulaError::ReadFailed { .. }));
        assert_eq!(e.kind(), ErrorKind::Io);
    }

    #[test]
    fn invalid_svg_is_rendering_failure() {
        let e = FormulaError::InvalidSvg {
            path: "a.svg".into(),
            detail: "unexpected end".into(),
        };
        assert_eq!(e.kind(), ErrorKind::RenderingFailure);
    }
}
