//! Input resolution: validate user-supplied paths and enumerate batch inputs.
//!
//! Every public entry point runs its input through here first so a missing
//! file is reported as [`FormulaError::FileNotFound`] before any rendering or
//! network work starts.

use crate::error::FormulaError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extension suffix appended to an SVG path when no output is given.
pub const DEFAULT_OUTPUT_SUFFIX: &str = ".png";

/// Validate that `path` names an existing, readable regular file.
pub fn resolve_local(path: &Path) -> Result<PathBuf, FormulaError> {
    if !path.is_file() {
        return Err(FormulaError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    // Check read permission by attempting to open
    std::fs::File::open(path).map_err(|e| FormulaError::from_read(path, e))?;

    debug!("Resolved local file: {}", path.display());
    Ok(path.to_path_buf())
}

/// Default PNG destination for an SVG: the full source path plus `.png`.
///
/// `figures/eq.svg` becomes `figures/eq.svg.png`; the original extension is
/// kept so the source of a PNG stays obvious.
pub fn default_png_path(svg_path: &Path) -> PathBuf {
    let mut name = OsString::from(svg_path.as_os_str());
    name.push(DEFAULT_OUTPUT_SUFFIX);
    PathBuf::from(name)
}

/// Returns true if `path` has a `png` extension, ignoring case.
pub fn is_png_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"))
}

/// List the PNG files directly inside `dir` (non-recursive), sorted by name.
pub fn list_png_files(dir: &Path) -> Result<Vec<PathBuf>, FormulaError> {
    if !dir.is_dir() {
        return Err(FormulaError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| FormulaError::from_read(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FormulaError::from_read(dir, e))?;
        let path = entry.path();
        if path.is_file() && is_png_path(&path) {
            files.push(path);
        }
    }
    files.sort();

    debug!("Found {} PNG files in {}", files.len(), dir.display());
    Ok(files)
}
