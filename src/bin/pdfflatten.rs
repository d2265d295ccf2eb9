//! CLI binary for pdf-flatten.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `FlattenConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_flatten::{
    export_page_images, flatten, inspect, ColorMode, FailurePolicy, FlattenConfig,
    FlattenProgressCallback, ImageFormat, ProgressCallback, RendererPreference,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-page log
/// lines. Works correctly when pages complete out-of-order (the fallback
/// pass runs concurrently).
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-page wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Create a callback whose progress-bar length is set dynamically by
    /// `on_flatten_start` (called once the page count is known).
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn page_elapsed(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

impl FlattenProgressCallback for CliProgressCallback {
    fn on_flatten_start(&self, total_pages: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Flattening");
        self.bar.reset_eta();
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, used_fallback: bool) {
        let secs = self.page_elapsed(page_num);
        let marker = if used_fallback {
            cyan("↻")
        } else {
            green("✓")
        };
        let note = if used_fallback { "fallback" } else { "" };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            marker,
            page_num,
            total,
            dim(note),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: String) {
        let secs = self.page_elapsed(page_num);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_flatten_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages rendered",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages rendered  ({} placeholder)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Flatten next to the input (writes document-flat.pdf)
  pdfflatten document.pdf

  # Explicit output path, higher resolution
  pdfflatten scan.pdf -o scan-clean.pdf --dpi 300

  # Lossless pages, grayscale
  pdfflatten contract.pdf -o contract-flat.pdf --format png --grayscale

  # Keep going when a page cannot be rendered (blank placeholder pages)
  pdfflatten damaged.pdf -o damaged-flat.pdf --on-failure placeholder

  # No pdfium installed? Use the external renderer for everything
  pdfflatten report.pdf -o report-flat.pdf --renderer fallback-only

  # Export pages as PNG files instead of building a PDF
  pdfflatten slides.pdf --to-images

  # Page geometry without converting anything
  pdfflatten --inspect-only document.pdf

RENDERERS:
  primary        pdfium, loaded as a shared library (in-process, fast)
  fallback       pdftoppm (poppler-utils), invoked per page as a subprocess

  The default preference tries pdfium first and retries failed pages with
  pdftoppm at identical pixel dimensions. Neither renderer is required to
  be present as long as the other can serve every page.

EXIT STATUS:
  0  every page rendered
  1  fatal error; no output file was written
  3  output written with placeholder pages (--on-failure placeholder)

ENVIRONMENT VARIABLES:
  PDFFLATTEN_DPI          Default render resolution
  PDFFLATTEN_FORMAT       jpeg | png
  PDFFLATTEN_RENDERER     primary-then-fallback | primary-only | fallback-only
  PDFFLATTEN_FALLBACK     Fallback tool name or path
  PDFIUM_DYNAMIC_LIB_PATH Directory containing the pdfium shared library
"#;

/// Strip the text layer from PDFs by rasterising every page.
#[derive(Parser, Debug)]
#[command(
    name = "pdfflatten",
    version,
    about = "Strip the text layer from PDFs by rasterising every page",
    long_about = "Render every page of a PDF to an image and rebuild the document from those \
images. The output is visually identical to the input but contains no extractable or \
searchable text. Page sizes, orientation, and order are preserved exactly.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Path to the source PDF.
    input: PathBuf,

    /// Output PDF path. Defaults to "<input>-flat.pdf" next to the input.
    #[arg(short, long, env = "PDFFLATTEN_OUTPUT")]
    output: Option<PathBuf>,

    /// Render resolution in DPI (72–600).
    #[arg(long, env = "PDFFLATTEN_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Page image compression: jpeg (smaller) or png (lossless).
    #[arg(long, env = "PDFFLATTEN_FORMAT", value_enum, default_value = "jpeg")]
    format: FormatArg,

    /// JPEG quality 1–100.
    #[arg(long, env = "PDFFLATTEN_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Render pages in grayscale.
    #[arg(long, env = "PDFFLATTEN_GRAYSCALE")]
    grayscale: bool,

    /// What to do when a page fails every renderer.
    #[arg(long, env = "PDFFLATTEN_ON_FAILURE", value_enum, default_value = "abort")]
    on_failure: FailureArg,

    /// Renderer preference.
    #[arg(long, env = "PDFFLATTEN_RENDERER", value_enum, default_value = "primary-then-fallback")]
    renderer: RendererArg,

    /// Name or path of the external fallback renderer.
    #[arg(long, env = "PDFFLATTEN_FALLBACK", default_value = "pdftoppm")]
    fallback_tool: String,

    /// Timeout per fallback-tool invocation, in seconds.
    #[arg(long, env = "PDFFLATTEN_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Concurrent fallback-tool invocations.
    #[arg(short, long, env = "PDFFLATTEN_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFFLATTEN_PASSWORD")]
    password: Option<String>,

    /// Export pages as PNG files instead of building a PDF.
    /// With no value, writes into a directory named after the input.
    #[arg(long, num_args = 0..=1, value_name = "DIR")]
    to_images: Option<Option<PathBuf>>,

    /// Print page count and geometry only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Output the run result as JSON.
    #[arg(long, env = "PDFFLATTEN_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PDFFLATTEN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFFLATTEN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFFLATTEN_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FormatArg {
    Jpeg,
    Png,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FailureArg {
    Abort,
    Placeholder,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum RendererArg {
    PrimaryThenFallback,
    PrimaryOnly,
    FallbackOnly,
}

impl From<FormatArg> for ImageFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Jpeg => ImageFormat::Jpeg,
            FormatArg::Png => ImageFormat::Png,
        }
    }
}

impl From<FailureArg> for FailurePolicy {
    fn from(v: FailureArg) -> Self {
        match v {
            FailureArg::Abort => FailurePolicy::Abort,
            FailureArg::Placeholder => FailurePolicy::Placeholder,
        }
    }
}

impl From<RendererArg> for RendererPreference {
    fn from(v: RendererArg) -> Self {
        match v {
            RendererArg::PrimaryThenFallback => RendererPreference::PrimaryThenFallback,
            RendererArg::PrimaryOnly => RendererPreference::PrimaryOnly,
            RendererArg::FallbackOnly => RendererPreference::FallbackOnly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(&cli.input, cli.password.as_deref())
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize info")?
            );
        } else {
            println!("File:         {}", cli.input.display());
            println!("PDF Version:  {}", info.pdf_version);
            println!("Pages:        {}", info.page_count);
            for (i, page) in info.pages.iter().enumerate() {
                println!(
                    "  Page {:>3}:   {:.1} x {:.1} pt",
                    i + 1,
                    page.width_pts,
                    page.height_pts
                );
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn FlattenProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Image-export mode ────────────────────────────────────────────────
    if let Some(ref dir_arg) = cli.to_images {
        let dir = match dir_arg {
            Some(dir) => dir.clone(),
            None => default_image_dir(&cli.input),
        };
        let output = export_page_images(&cli.input, &dir, &config)
            .await
            .context("Image export failed")?;

        if cli.json {
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else if !cli.quiet {
            eprintln!(
                "{}  {} pages  →  {}",
                green("✔"),
                output.stats.total_pages,
                bold(&dir.display().to_string()),
            );
        }
        return Ok(());
    }

    // ── Flatten ──────────────────────────────────────────────────────────
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input));

    let output = flatten(&cli.input, &output_path, &config)
        .await
        .context("Flattening failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !cli.quiet {
        eprintln!(
            "{}  {}/{} pages  {}ms  →  {}",
            if output.is_partial() {
                cyan("⚠")
            } else {
                green("✔")
            },
            output.stats.rendered_pages + output.stats.fallback_pages,
            output.stats.total_pages,
            output.stats.total_duration_ms,
            bold(&output_path.display().to_string()),
        );
        eprintln!(
            "   {}  {}",
            dim(&format!("{} bytes", output.stats.output_bytes)),
            dim(&format!(
                "{} fallback, {} placeholder",
                output.stats.fallback_pages, output.stats.failed_pages
            )),
        );
    }

    // Placeholder pages in the output: distinguishable from full success.
    if output.is_partial() {
        std::process::exit(3);
    }

    Ok(())
}

/// Map CLI args to `FlattenConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<FlattenConfig> {
    let mut builder = FlattenConfig::builder()
        .dpi(cli.dpi)
        .image_format(cli.format.clone().into())
        .jpeg_quality(cli.quality)
        .color_mode(if cli.grayscale {
            ColorMode::Grayscale
        } else {
            ColorMode::Rgb
        })
        .on_page_failure(cli.on_failure.clone().into())
        .renderer(cli.renderer.clone().into())
        .fallback_tool(&cli.fallback_tool)
        .page_timeout_secs(cli.timeout)
        .concurrency(cli.concurrency);

    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// "<dir>/<stem>-flat.pdf" next to the input.
fn default_output_path(input: &PathBuf) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}-flat.pdf"))
}

/// "<dir>/<stem>/" next to the input, for image export.
fn default_image_dir(input: &PathBuf) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pages".to_string());
    input.with_file_name(stem)
}
