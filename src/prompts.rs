//! Prompts sent to the vision model for formula recognition.
//!
//! Centralising the prompts here keeps the wording in exactly one place and
//! lets unit tests inspect them without a live endpoint.
//!
//! Callers can override either prompt via
//! [`crate::config::RecognizerConfig::system_prompt`] and
//! [`crate::config::RecognizerConfig::user_prompt`]; the constants here are
//! used only when no override is provided.

/// Token the model is asked to answer with when it cannot read a formula.
///
/// The library never branches on it; it is part of the prompt contract only.
pub const UNRECOGNIZED: &str = "Unrecognized";

/// Default system message establishing the assistant's role.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that extracts LaTeX from images of math formulas.";

/// Default user instruction sent alongside the image.
pub const DEFAULT_USER_PROMPT: &str = "Extract the LaTeX code for the math formula in this image. \
Return only the LaTeX code. If uncertain, return single word 'Unrecognized'.";
