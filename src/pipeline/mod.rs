//! Pipeline stages for SVG rendering and formula recognition.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the remote model can be swapped without touching file handling.
//!
//! ## Data Flow
//!
//! ```text
//! svg2png:    input ──▶ render ──▶ PNG on disk
//!             (path)    (resvg)
//!
//! png2latex:  input ──▶ encode ──▶ auth ──▶ llm ──▶ LaTeX
//!             (path)    (base64)   (token)  (VLM)
//! ```
//!
//! 1. [`input`]  — validate paths, derive default output names, list batch files
//! 2. [`render`] — rasterise the SVG and flatten it onto white; runs in
//!    `spawn_blocking` because resvg is synchronous and CPU-bound
//! 3. [`encode`] — base64-wrap the PNG bytes as a data URI
//! 4. [`auth`]   — obtain an Entra ID bearer token from the ambient environment
//! 5. [`llm`]    — the [`llm::VisionBackend`] seam and its Azure OpenAI implementation

pub mod auth;
pub mod encode;
pub mod input;
pub mod llm;
pub mod render;
