//! CLI binary for water-bill-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs the batch and prints the JSON report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use water_bill_extract::pipeline::input::expand_inputs;
use water_bill_extract::{
    process_inputs, BatchProgressCallback, BatchReport, ExtractionConfig, ProgressCallback,
    SamplingConfig, Stage, Workflow,
};

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

/// Terminal progress callback: one bar over the batch plus a log line per
/// finished document. Documents complete out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .map(|mut m| m.remove(&index))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting bills from {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, index: usize, file_name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(file_name.to_string());
    }

    fn on_stage_complete(&self, _index: usize, stage: Stage) {
        self.bar.set_message(stage.to_string());
    }

    fn on_document_complete(&self, index: usize, file_name: &str, bill_count: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            green("✓"),
            file_name,
            dim(&format!("{bill_count:>2} bills")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, file_name: &str, stage: Option<Stage>, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        let stage = stage.map(|s| format!("[{s}] ")).unwrap_or_default();

        self.bar.println(format!(
            "  {} {:<32}  {}{}  {}",
            red("✗"),
            file_name,
            dim(&stage),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} documents extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents extracted  ({} failed)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One bill, JSON on stdout
  billx march.pdf

  # A folder of bills, pretty JSON to a file
  billx --pretty -o bills.json scans/

  # Skip page images (no pdfium needed)
  billx --no-images march.pdf

  # Bills from a URL, four documents at a time
  billx -c 4 https://example.com/bills/q1.pdf https://example.com/bills/q2.pdf

  # Reject bills whose reading dates are out of order
  billx --enforce-chronology march.pdf

OUTPUT:
  {"results": [
     {"file_name": "...", "address": "...", "bills": [
        {"file_name", "bill_no", "start_date": {day, month, year}, "end_date",
         "usage", "water", "sewage", "bill_amount", "image"}]},
     {"file_name": "...", "error": "...", "stage": "check_multiple_bills"}]}

ENVIRONMENT VARIABLES:
  MISTRAL_API_KEY         OCR (required)
  GEMINI_API_KEY          Structured extraction via Gemini (GOOGLE_API_KEY also works)
  EDGEQUAKE_LLM_PROVIDER  Use an edgequake-llm provider instead of Gemini
  EDGEQUAKE_MODEL         Model for EDGEQUAKE_LLM_PROVIDER
  PDFIUM_LIB_PATH         Path to the libpdfium shared library
  RUST_LOG                Log filter (overrides --verbose / --quiet)
"#;

/// Extract structured billing data from water-bill PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "billx",
    version,
    about = "Extract structured billing data from water-bill PDFs",
    long_about = "OCR water-bill PDFs (local files, directories or URLs), decide whether each \
holds one or several billing periods, extract every bill with a schema-constrained LLM call \
and attach an image of the page it came from.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files, directories of PDFs, or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write the JSON report to this file instead of stdout.
    #[arg(short, long, env = "BILLX_OUTPUT")]
    output: Option<PathBuf>,

    /// Pretty-print the JSON report.
    #[arg(long, env = "BILLX_PRETTY")]
    pretty: bool,

    /// OCR model.
    #[arg(long, env = "BILLX_OCR_MODEL", default_value = "mistral-ocr-latest")]
    ocr_model: String,

    /// Model deciding single vs. multiple billing periods.
    #[arg(long, env = "BILLX_CLASSIFIER_MODEL", default_value = "gemini-2.5-flash-lite")]
    classifier_model: String,

    /// Model extracting a single bill.
    #[arg(long, env = "BILLX_SINGLE_MODEL", default_value = "gemini-2.5-flash-lite")]
    single_model: String,

    /// Model extracting several bills.
    #[arg(long, env = "BILLX_MULTI_MODEL", default_value = "gemini-2.5-flash")]
    multi_model: String,

    /// edgequake-llm provider used instead of Gemini: openai, anthropic, ollama, …
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Model for --provider.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Sampling seed sent with every structured call.
    #[arg(long, env = "BILLX_SEED", default_value_t = 5)]
    seed: i64,

    /// Max output tokens per structured call.
    #[arg(long, env = "BILLX_MAX_TOKENS")]
    max_tokens: Option<u32>,

    /// 0-based pages to OCR, e.g. 0,1,4. Default: all pages.
    #[arg(long, env = "BILLX_OCR_PAGES")]
    ocr_pages: Option<String>,

    /// Page render zoom (0.5–8.0).
    #[arg(long, env = "BILLX_ZOOM", default_value_t = 2.0)]
    zoom: f32,

    /// Do not render page images.
    #[arg(long, env = "BILLX_NO_IMAGES")]
    no_images: bool,

    /// Reject bills whose previous reading date is not before the current one.
    #[arg(long, env = "BILLX_ENFORCE_CHRONOLOGY")]
    enforce_chronology: bool,

    /// Documents processed concurrently.
    #[arg(short, long, env = "BILLX_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Path to the libpdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "BILLX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BILLX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "BILLX_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "BILLX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// OCR / LLM call timeout in seconds.
    #[arg(long, env = "BILLX_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar provides all the feedback that matters, so INFO logs
    // are suppressed while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Build config and services ────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let workflow = Workflow::from_env(config).context("Failed to configure services")?;

    let inputs = expand_inputs(&cli.inputs).context("Failed to list inputs")?;
    if inputs.is_empty() {
        anyhow::bail!("No PDF files found in the given inputs");
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let start = Instant::now();
    let outcomes = process_inputs(&workflow, &inputs).await;
    let report = BatchReport::from_outcomes(&outcomes);

    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
    .context("Failed to serialise report")?;

    match cli.output {
        Some(ref path) => {
            write_atomic(path, &json).await?;
            if !cli.quiet {
                eprintln!(
                    "{}  {}/{} documents  {}ms  →  {}",
                    if report.success_count() == report.results.len() {
                        green("✔")
                    } else {
                        cyan("⚠")
                    },
                    report.success_count(),
                    report.results.len(),
                    start.elapsed().as_millis(),
                    bold(&path.display().to_string()),
                );
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .and_then(|_| handle.write_all(b"\n"))
                .context("Failed to write to stdout")?;
        }
    }

    if report.all_failed() {
        anyhow::bail!("All {} documents failed", report.results.len());
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let sampling = SamplingConfig {
        seed: cli.seed,
        max_output_tokens: cli.max_tokens,
        ..SamplingConfig::default()
    };

    let mut builder = ExtractionConfig::builder()
        .ocr_model(&cli.ocr_model)
        .classifier_model(&cli.classifier_model)
        .single_bill_model(&cli.single_model)
        .multi_bill_model(&cli.multi_model)
        .sampling(sampling)
        .render_zoom(cli.zoom)
        .render_images(!cli.no_images)
        .enforce_chronology(cli.enforce_chronology)
        .concurrency(cli.concurrency)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref pages) = cli.ocr_pages {
        builder = builder.ocr_pages(parse_page_list(pages)?);
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref path) = cli.pdfium_lib_path {
        builder = builder.pdfium_library_path(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--ocr-pages` ("0,2,5") into 0-based indices.
fn parse_page_list(s: &str) -> Result<Vec<usize>> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<usize>()
                .with_context(|| format!("Invalid page number: '{p}'"))
        })
        .collect()
}

/// Write to a temp file next to `path`, then rename over it.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
