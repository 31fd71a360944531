//! CLI binary for edgequake-formula.
//!
//! A thin shim over the library crate that maps subcommands and flags to
//! `RenderConfig` / `RecognizerConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_formula::{
    batch_png_to_latex, png_to_latex, svg_to_png, BatchOutput, BatchProgressCallback,
    ProgressCallback, RecognizerConfig, RenderConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Printed before and after each file's result in batch mode.
const SEPARATOR: &str = "----------------------------------------";

/// Process exit status for a command that completed without error.
const EXIT_OK: u8 = 0;
/// Process exit status when the command, or any file in a batch, failed.
const EXIT_FAILURE: u8 = 1;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

// ── Batch printer ────────────────────────────────────────────────────────────

/// Prints each batch result as soon as it arrives, framed by separators.
///
/// Results go to `out` (stdout in the binary); the spinner shown while a file
/// is in flight goes to stderr and is cleared before anything is printed.
struct CliBatchCallback<W> {
    show_spinner: bool,
    out: Mutex<W>,
    current: Mutex<Option<ProgressBar>>,
}

impl<W: Write + Send> CliBatchCallback<W> {
    fn new(out: W, show_spinner: bool) -> Self {
        Self {
            show_spinner,
            out: Mutex::new(out),
            current: Mutex::new(None),
        }
    }

    fn clear_spinner(&self) {
        if let Some(bar) = self.current.lock().unwrap().take() {
            bar.finish_and_clear();
        }
    }

    fn write_lines(&self, lines: &[&str]) {
        let mut out = self.out.lock().unwrap();
        let result = lines
            .iter()
            .try_for_each(|line| writeln!(out, "{line}"))
            .and_then(|_| out.flush());
        if let Err(e) = result {
            tracing::warn!("Failed to write batch output: {e}");
        }
    }
}

impl<W: Write + Send> BatchProgressCallback for CliBatchCallback<W> {
    fn on_file_start(&self, index: usize, total: usize, path: &Path) {
        self.write_lines(&[SEPARATOR]);
        if self.show_spinner {
            let bar = spinner(format!("[{index}/{total}] {}", path.display()));
            *self.current.lock().unwrap() = Some(bar);
        }
    }

    fn on_file_complete(&self, _index: usize, _total: usize, path: &Path, latex: &str) {
        self.clear_spinner();
        let header = format!("LaTeX for {}:", path.display());
        self.write_lines(&[header.as_str(), latex, SEPARATOR]);
    }

    fn on_file_error(&self, _index: usize, _total: usize, path: &Path, error: &str) {
        self.clear_spinner();
        let line = format!("Error processing {}: {}", path.display(), error);
        self.write_lines(&[line.as_str(), SEPARATOR]);
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render an SVG next to itself (formula.svg → formula.svg.png)
  formula svg2png formula.svg

  # Render at twice the intrinsic size to a chosen file
  formula svg2png formula.svg -o formula.png -s 2

  # Recognise one PNG
  formula png2latex formula.png

  # Recognise every PNG in a directory with a specific deployment
  formula batch-png2latex ./formulas -m gpt-4o

ENVIRONMENT VARIABLES:
  AZURE_OPENAI_ENDPOINT     https://<resource>.openai.azure.com/
  AZURE_OPENAI_DEPLOYMENT   Vision-capable deployment name (overridden by -m)
  AZURE_OPENAI_API_VERSION  REST API version (default 2024-02-15-preview)
  AZURE_OPENAI_AD_TOKEN     Pre-acquired Entra ID bearer token
  AZURE_TENANT_ID / AZURE_CLIENT_ID / AZURE_CLIENT_SECRET
                            Service principal used to obtain a token
  RUST_LOG                  Log filter (overrides -v / -q)

  A .env file in the working directory is read automatically. Without a
  token variable or service principal, the Azure CLI login (`az login`) is used.
"#;

/// Render SVG formulas to PNG and recognise PNG formulas as LaTeX.
#[derive(Parser, Debug)]
#[command(
    name = "formula",
    version,
    about = "SVG to PNG and PNG to LaTeX converter",
    long_about = "Render SVG formulas to PNG on a white background, and recognise formulas in \
PNG images as LaTeX using a vision model deployed on Azure OpenAI.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FORMULA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, global = true, env = "FORMULA_QUIET")]
    quiet: bool,

    /// Disable the spinner shown while waiting for the model.
    #[arg(long, global = true, env = "FORMULA_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert SVG to PNG.
    #[command(name = "svg2png")]
    Svg2Png {
        /// Path to the SVG file.
        svg_path: PathBuf,

        /// Path to save the PNG file. Default: <svg_path>.png
        #[arg(short = 'o', long = "output")]
        png_path: Option<PathBuf>,

        /// Scale factor for the output PNG.
        #[arg(short, long, default_value_t = 1.0)]
        scale: f32,
    },

    /// Convert PNG to LaTeX.
    #[command(name = "png2latex")]
    Png2Latex {
        /// Path to the PNG file.
        png_path: PathBuf,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Convert all PNGs in a directory to LaTeX.
    #[command(name = "batch-png2latex")]
    BatchPng2Latex {
        /// Directory containing PNG files.
        directory: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        /// Print a JSON summary instead of per-file text.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Azure OpenAI deployment name. Default: AZURE_OPENAI_DEPLOYMENT.
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Azure OpenAI endpoint URL. Default: AZURE_OPENAI_ENDPOINT.
    #[arg(long)]
    endpoint: Option<String>,

    /// Per-request timeout in seconds. Default: none.
    #[arg(long)]
    timeout: Option<u64>,
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Suppress INFO-level library logs while a spinner is active; stdout
    // carries only results either way.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.verbose;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mut out = io::stdout();
    let mut err = io::stderr();

    let code = match cli.command {
        Command::Svg2Png {
            ref svg_path,
            ref png_path,
            scale,
        } => run_svg2png(&mut out, &mut err, svg_path, png_path.as_deref(), scale).await?,
        Command::Png2Latex {
            ref png_path,
            ref model,
        } => {
            let config = build_recognizer_config(model, None)?;
            run_png2latex(&mut out, &mut err, png_path, &config, show_progress).await?
        }
        Command::BatchPng2Latex {
            ref directory,
            ref model,
            json,
        } => {
            let progress: Option<ProgressCallback> = if json {
                None
            } else {
                let printer = CliBatchCallback::new(io::stdout(), show_progress);
                Some(Arc::new(printer) as ProgressCallback)
            };
            let config = build_recognizer_config(model, progress)?;
            run_batch(&mut out, &mut err, directory, &config, json, cli.quiet).await?
        }
    };

    Ok(ExitCode::from(code))
}

async fn run_svg2png(
    out: &mut impl Write,
    err: &mut impl Write,
    svg_path: &Path,
    png_path: Option<&Path>,
    scale: f32,
) -> Result<u8> {
    let result = match RenderConfig::builder().scale(scale).build() {
        Ok(config) => svg_to_png(svg_path, png_path, &config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(path) => {
            writeln!(out, "PNG saved to: {}", path.display())?;
            Ok(EXIT_OK)
        }
        Err(e) => {
            writeln!(err, "{} {}", red("Error:"), e)?;
            Ok(EXIT_FAILURE)
        }
    }
}

async fn run_png2latex(
    out: &mut impl Write,
    err: &mut impl Write,
    png_path: &Path,
    config: &RecognizerConfig,
    show_progress: bool,
) -> Result<u8> {
    let bar = show_progress.then(|| spinner(format!("Recognising {}", png_path.display())));
    let result = png_to_latex(png_path, config).await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    match result {
        Ok(formula) => {
            writeln!(out, "LaTeX for {}:", png_path.display())?;
            writeln!(out, "{}", formula.latex)?;
            Ok(EXIT_OK)
        }
        Err(e) => {
            let prefix = format!("Error processing {}:", png_path.display());
            writeln!(err, "{} {}", red(&prefix), e)?;
            Ok(EXIT_FAILURE)
        }
    }
}

async fn run_batch(
    out: &mut impl Write,
    err: &mut impl Write,
    directory: &Path,
    config: &RecognizerConfig,
    json: bool,
    quiet: bool,
) -> Result<u8> {
    match batch_png_to_latex(directory, config).await {
        Ok(output) => {
            write_batch_report(out, err, directory, &output, json, quiet)?;
            Ok(batch_status(&output))
        }
        Err(e) => {
            writeln!(err, "{} {}", red("Error:"), e)?;
            Ok(EXIT_FAILURE)
        }
    }
}

/// Print what the per-file callback does not: the JSON summary, the
/// empty-directory notice and the closing tally on `err`.
fn write_batch_report(
    out: &mut impl Write,
    err: &mut impl Write,
    directory: &Path,
    output: &BatchOutput,
    json: bool,
    quiet: bool,
) -> Result<()> {
    if json {
        let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
        writeln!(out, "{json}")?;
    } else if output.is_empty() {
        writeln!(out, "No PNG files found in {}", directory.display())?;
    }

    if !quiet && !output.is_empty() {
        let failed = output.failed();
        writeln!(
            err,
            "{} {}/{} files recognised  {}ms",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&output.succeeded().to_string()),
            output.entries.len(),
            output.total_duration_ms,
        )?;
    }
    Ok(())
}

/// An empty batch succeeds; any failed file fails the whole run.
fn batch_status(output: &BatchOutput) -> u8 {
    if output.failed() == 0 {
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

/// Map CLI flags onto the environment-derived `RecognizerConfig`.
///
/// Explicit flags win over `AZURE_OPENAI_*` variables.
fn build_recognizer_config(
    args: &ModelArgs,
    progress: Option<ProgressCallback>,
) -> Result<RecognizerConfig> {
    let mut builder = RecognizerConfig::from_env().into_builder();

    if let Some(ref endpoint) = args.endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let Some(ref model) = args.model {
        builder = builder.deployment(model);
    }
    if let Some(secs) = args.timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
