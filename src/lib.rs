//! # edgequake-formula
//!
//! Render SVG formulas to PNG and read PNG formulas back as LaTeX using a
//! Vision Language Model (VLM) hosted on Azure OpenAI.
//!
//! ## Pipeline Overview
//!
//! ```text
//! svg2png          SVG ──▶ resvg ──▶ flatten onto white ──▶ PNG
//!
//! png2latex        PNG ──▶ base64 data URI ──▶ Azure OpenAI (bearer token) ──▶ LaTeX
//!
//! batch-png2latex  dir ──▶ *.png ──▶ png2latex × N (sequential)
//! ```
//!
//! Rasterisation is done entirely by [resvg](https://crates.io/crates/resvg);
//! recognition entirely by the remote model. This crate is the plumbing:
//! path handling, default naming, transparency flattening, request
//! construction, credential discovery and batch iteration.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_formula::{png_to_latex, svg_to_png, RecognizerConfig, RenderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let png = svg_to_png("euler.svg", None, &RenderConfig::default()).await?;
//!
//!     // Endpoint and deployment from AZURE_OPENAI_ENDPOINT / AZURE_OPENAI_DEPLOYMENT
//!     let config = RecognizerConfig::from_env();
//!     let result = png_to_latex(&png, &config).await?;
//!     println!("{}", result.latex);
//!     Ok(())
//! }
//! ```
//!
//! ## Authentication
//!
//! No API key is used. A bearer token is taken from the first available of
//! `AZURE_OPENAI_AD_TOKEN`, a service principal, a managed identity, or the
//! Azure CLI login. See [`pipeline::auth`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `formula` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    AzureTarget, RecognizerConfig, RecognizerConfigBuilder, RenderConfig, RenderConfigBuilder,
};
pub use convert::{
    batch_png_to_latex, png_to_latex, png_to_latex_sync, resolve_backend, svg_to_png,
    svg_to_png_sync,
};
pub use error::{ErrorKind, FormulaError};
pub use output::{BatchEntry, BatchOutput, FormulaResult};
pub use pipeline::auth::{AccessToken, DefaultCredential, StaticTokenCredential, TokenCredential};
pub use pipeline::encode::ImageData;
pub use pipeline::llm::{AzureOpenAiBackend, VisionBackend, VisionRequest};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
