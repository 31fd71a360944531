//! SVG rasterisation: parse with usvg, draw with resvg, flatten onto white.
//!
//! Parsing, font loading and rasterisation are CPU-bound and synchronous, so
//! [`render_svg_file`] runs them under `tokio::task::spawn_blocking`.
//!
//! resvg draws onto a transparent canvas. Every output PNG is composited over
//! opaque white and stored as 8-bit RGB.

use crate::config::RenderConfig;
use crate::error::FormulaError;
use image::{DynamicImage, ImageFormat, Rgba, RgbImage, RgbaImage};
use resvg::{tiny_skia, usvg};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Render the SVG at `svg_path` and write a flattened PNG to `png_path`.
///
/// Runs inside `spawn_blocking`. Returns the output dimensions.
pub async fn render_svg_file(
    svg_path: &Path,
    png_path: &Path,
    config: &RenderConfig,
) -> Result<(u32, u32), FormulaError> {
    let svg = svg_path.to_path_buf();
    let png = png_path.to_path_buf();
    let scale = config.scale;

    tokio::task::spawn_blocking(move || render_svg_file_blocking(&svg, &png, scale))
        .await
        .map_err(|e| FormulaError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of [`render_svg_file`].
pub fn render_svg_file_blocking(
    svg_path: &Path,
    png_path: &Path,
    scale: f32,
) -> Result<(u32, u32), FormulaError> {
    let data = std::fs::read(svg_path).map_err(|e| FormulaError::from_read(svg_path, e))?;

    let resources_dir = std::fs::canonicalize(svg_path)
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));

    let raster = rasterise_svg(&data, scale, resources_dir).map_err(|e| match e {
        RasterError::Parse(detail) => FormulaError::InvalidSvg {
            path: svg_path.to_path_buf(),
            detail,
        },
        RasterError::Canvas(detail) => FormulaError::RasterisationFailed {
            path: svg_path.to_path_buf(),
            detail,
        },
    })?;

    let flat = flatten_onto_white(DynamicImage::ImageRgba8(raster));
    let dims = flat.dimensions();
    save_png(&flat, png_path)?;

    info!(
        "Rendered {} → {} ({}x{} px)",
        svg_path.display(),
        png_path.display(),
        dims.0,
        dims.1
    );
    Ok(dims)
}

/// Failure inside [`rasterise_svg`], before a path is attached.
#[derive(Debug)]
pub enum RasterError {
    /// usvg rejected the document.
    Parse(String),
    /// The document parsed but has no drawable area at this scale.
    Canvas(String),
}

/// Rasterise SVG bytes at `scale` into a straight-alpha RGBA image.
pub fn rasterise_svg(
    data: &[u8],
    scale: f32,
    resources_dir: Option<PathBuf>,
) -> Result<RgbaImage, RasterError> {
    let mut opt = usvg::Options {
        resources_dir,
        ..usvg::Options::default()
    };
    opt.fontdb_mut().load_system_fonts();

    let tree = usvg::Tree::from_data(data, &opt).map_err(|e| RasterError::Parse(e.to_string()))?;

    let size = tree.size();
    let width = (size.width() * scale).ceil() as u32;
    let height = (size.height() * scale).ceil() as u32;
    debug!(
        "SVG intrinsic size {}x{}, scale {} → {}x{} px",
        size.width(),
        size.height(),
        scale,
        width,
        height
    );

    let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or_else(|| {
        RasterError::Canvas(format!("cannot allocate a {width}x{height} canvas"))
    })?;
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(scale, scale),
        &mut pixmap.as_mut(),
    );

    // tiny-skia stores premultiplied alpha; the image crate expects straight.
    let mut rgba = RgbaImage::new(width, height);
    for (dst, src) in rgba.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    Ok(rgba)
}

/// Composite any transparency over opaque white and drop the alpha channel.
///
/// Images without alpha are only converted to 8-bit RGB.
pub fn flatten_onto_white(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let fg = img.to_rgba8();
    let mut canvas = RgbaImage::from_pixel(fg.width(), fg.height(), Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut canvas, &fg, 0, 0);
    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

/// Write `img` as PNG to `path`, replacing any existing file.
///
/// The PNG is encoded into a temp file next to the target and then renamed
/// over it, so an interrupted run never leaves a truncated image behind.
pub fn save_png(img: &RgbImage, path: &Path) -> Result<(), FormulaError> {
    let write_err = |source: std::io::Error| FormulaError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent).map_err(write_err)?;
            parent
        }
        None => Path::new("."),
    };

    // Replacing a file keeps its permissions; a new file gets the usual
    // 0o666 minus umask rather than tempfile's private 0o600.
    let existing = std::fs::metadata(path).ok().map(|m| m.permissions());

    let mut builder = tempfile::Builder::new();
    builder.prefix(".formula-").suffix(".png.tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(
            existing
                .clone()
                .unwrap_or_else(|| std::fs::Permissions::from_mode(0o666)),
        );
    }
    let mut tmp = builder.tempfile_in(parent).map_err(write_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        img.write_to(&mut writer, ImageFormat::Png)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        writer.flush().map_err(write_err)?;
    }
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    // The umask applies at creation, so restore the replaced file's exact mode.
    if let Some(perms) = existing {
        std::fs::set_permissions(path, perms).map_err(write_err)?;
    }

    debug!("Wrote {}", path.display());
    Ok(())
}
