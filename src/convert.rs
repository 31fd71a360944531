//! Public entry points: render, recognise one file, recognise a directory.
//!
//! Every function validates its input path first, so a missing file is
//! reported as [`FormulaError::FileNotFound`] before any rendering work or
//! network call happens. Recognition then resolves its backend, which fails
//! with [`FormulaError::MissingConfiguration`] (again before any network
//! call) when neither a backend nor an endpoint/deployment pair is set.

use crate::config::{RecognizerConfig, RenderConfig};
use crate::error::FormulaError;
use crate::output::{BatchEntry, BatchOutput, FormulaResult};
use crate::pipeline::auth::{DefaultCredential, TokenCredential};
use crate::pipeline::llm::{self, AzureOpenAiBackend, VisionBackend};
use crate::pipeline::{encode, input, render};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Render an SVG file to a PNG on a white background.
///
/// # Arguments
/// * `svg_path` — existing SVG file
/// * `png_path` — destination; `None` means `<svg_path>.png`
/// * `config`   — render settings (scale)
///
/// # Returns
/// The path the PNG was written to. An existing file there is replaced.
///
/// # Example
/// ```rust,no_run
/// use edgequake_formula::{svg_to_png, RenderConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RenderConfig::builder().scale(2.0).build()?;
/// let out = svg_to_png("formula.svg", None, &config).await?;
/// assert_eq!(out.to_str(), Some("formula.svg.png"));
/// # Ok(())
/// # }
/// ```
pub async fn svg_to_png(
    svg_path: impl AsRef<Path>,
    png_path: Option<&Path>,
    config: &RenderConfig,
) -> Result<PathBuf, FormulaError> {
    let svg_path = svg_path.as_ref();
    info!("Rendering {}", svg_path.display());

    let svg = input::resolve_local(svg_path)?;
    config.validate()?;

    let dest = png_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input::default_png_path(&svg));

    render::render_svg_file(&svg, &dest, config).await?;
    Ok(dest)
}

/// Synchronous wrapper around [`svg_to_png`].
///
/// Creates a temporary tokio runtime internally.
pub fn svg_to_png_sync(
    svg_path: impl AsRef<Path>,
    png_path: Option<&Path>,
    config: &RenderConfig,
) -> Result<PathBuf, FormulaError> {
    runtime()?.block_on(svg_to_png(svg_path, png_path, config))
}

/// Recognise the formula in a PNG and return it as LaTeX.
///
/// The reply is the model's text, trimmed. When the model cannot read the
/// image it is asked to answer [`crate::prompts::UNRECOGNIZED`]; that reply
/// is returned like any other.
///
/// # Example
/// ```rust,no_run
/// use edgequake_formula::{png_to_latex, RecognizerConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // AZURE_OPENAI_ENDPOINT / AZURE_OPENAI_DEPLOYMENT from env or .env
/// let config = RecognizerConfig::from_env();
/// let result = png_to_latex("formula.png", &config).await?;
/// println!("{}", result.latex);
/// # Ok(())
/// # }
/// ```
pub async fn png_to_latex(
    png_path: impl AsRef<Path>,
    config: &RecognizerConfig,
) -> Result<FormulaResult, FormulaError> {
    let png_path = png_path.as_ref();
    info!("Recognising {}", png_path.display());

    input::resolve_local(png_path)?;
    let backend = resolve_backend(config)?;
    recognize_file(&backend, png_path, config).await
}

/// Synchronous wrapper around [`png_to_latex`].
///
/// Creates a temporary tokio runtime internally.
pub fn png_to_latex_sync(
    png_path: impl AsRef<Path>,
    config: &RecognizerConfig,
) -> Result<FormulaResult, FormulaError> {
    runtime()?.block_on(png_to_latex(png_path, config))
}

/// Recognise every PNG directly inside `directory`, one after another.
///
/// A failure on one file is recorded in its [`BatchEntry`] and the batch
/// moves on. The function itself fails only when the directory cannot be
/// listed or the backend cannot be configured. An empty directory yields an
/// empty [`BatchOutput`] without touching the backend.
pub async fn batch_png_to_latex(
    directory: impl AsRef<Path>,
    config: &RecognizerConfig,
) -> Result<BatchOutput, FormulaError> {
    let total_start = Instant::now();
    let directory = directory.as_ref();
    let files = input::list_png_files(directory)?;
    let total = files.len();

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(directory, total);
    }

    if files.is_empty() {
        info!("No PNG files found in {}", directory.display());
        if let Some(ref cb) = config.progress_callback {
            cb.on_batch_complete(0, 0);
        }
        return Ok(BatchOutput {
            directory: directory.to_path_buf(),
            entries: Vec::new(),
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        });
    }

    info!("Recognising {} PNG files in {}", total, directory.display());
    let backend = resolve_backend(config)?;

    let mut entries = Vec::with_capacity(total);
    for (i, path) in files.into_iter().enumerate() {
        let index = i + 1;
        if let Some(ref cb) = config.progress_callback {
            cb.on_file_start(index, total, &path);
        }

        let start = Instant::now();
        let outcome = match input::resolve_local(&path) {
            Ok(_) => recognize_file(&backend, &path, config).await,
            Err(e) => Err(e),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let entry = match outcome {
            Ok(result) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_file_complete(index, total, &path, &result.latex);
                }
                BatchEntry {
                    path,
                    latex: Some(result.latex),
                    error: None,
                    duration_ms,
                }
            }
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                let message = e.to_string();
                if let Some(ref cb) = config.progress_callback {
                    cb.on_file_error(index, total, &path, &message);
                }
                BatchEntry {
                    path,
                    latex: None,
                    error: Some(message),
                    duration_ms,
                }
            }
        };
        entries.push(entry);
    }

    let output = BatchOutput {
        directory: directory.to_path_buf(),
        entries,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Batch complete: {}/{} files, {}ms total",
        output.succeeded(),
        total,
        output.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, output.succeeded());
    }

    Ok(output)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Read, encode and recognise one PNG with an already-resolved backend.
async fn recognize_file(
    backend: &Arc<dyn VisionBackend>,
    path: &Path,
    config: &RecognizerConfig,
) -> Result<FormulaResult, FormulaError> {
    let start = Instant::now();

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| FormulaError::from_read(path, e))?;
    let image = encode::encode_image(&bytes);

    let latex = llm::recognize_image(backend, image, config).await?;

    Ok(FormulaResult {
        path: path.to_path_buf(),
        latex,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Resolve the vision backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.backend`) — used as-is. This is how
///    tests and embedding applications plug in their own model client.
///
/// 2. **Azure OpenAI** (`config.endpoint` + `config.deployment`) — both must
///    be set, otherwise [`FormulaError::MissingConfiguration`]. The bearer
///    token comes from `config.credential` or, if unset, the ambient
///    [`DefaultCredential`] chain. No token is requested here; that happens
///    on the first call.
pub fn resolve_backend(config: &RecognizerConfig) -> Result<Arc<dyn VisionBackend>, FormulaError> {
    if let Some(ref backend) = config.backend {
        debug!("Using pre-built backend '{}'", backend.name());
        return Ok(Arc::clone(backend));
    }

    let target = config.resolve_target()?;
    let timeout = config.request_timeout_secs.map(Duration::from_secs);
    let client = llm::build_http_client(timeout)?;

    let credential: Arc<dyn TokenCredential> = match config.credential {
        Some(ref c) => Arc::clone(c),
        None => Arc::new(DefaultCredential::from_env(client.clone())),
    };

    debug!(
        "Azure OpenAI target: {} / {} (api-version {})",
        target.endpoint, target.deployment, target.api_version
    );
    Ok(Arc::new(AzureOpenAiBackend::with_client(
        client, target, credential,
    )))
}

fn runtime() -> Result<tokio::runtime::Runtime, FormulaError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FormulaError::Internal(format!("Failed to create tokio runtime: {}", e)))
}
