//! CLI binary for pagewise.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use pagewise::ocr::primary::PrimarySettings;
use pagewise::ocr::secondary::SecondarySettings;
use pagewise::{
    convert, convert_to_file, inspect, ChunkType, ConversionConfig, ConversionProgressCallback,
    ConversionResult, ConversionService, InMemoryTaskStore, LocalStorage, OcrEngine,
    ProgressCallback, StorageSettings, TaskStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page. Pages finish out of order
/// when concurrency > 1, so start times are kept per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` supplies the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Analysing");
        bar.set_message("Classifying pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed_ms(&self, page_num: usize) -> u128 {
        self.start_times
            .lock()
            .map(|mut starts| starts.remove(&page_num))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting conversion of {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut starts) = self.start_times.lock() {
            starts.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, kind: ChunkType, content_len: usize) {
        let elapsed_ms = self.elapsed_ms(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<4}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            cyan(kind.as_str()),
            dim(&format!("{content_len:>5} chars")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let elapsed_ms = self.elapsed_ms(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages converted  ({} failed)",
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
  # Basic conversion (stdout)
  pagewise document.pdf

  # Convert to file
  pagewise document.pdf -o output.md

  # First 20 pages, flowing prose without markers or front matter
  pagewise --max-pages 20 --plain report.pdf -o report.md

  # OCR only through the job service
  pagewise --ocr-engine secondary scan.pdf -o scan.md

  # Convert from URL
  pagewise https://arxiv.org/pdf/1706.03762 -o attention.md

  # Classify pages without converting (no OCR credentials needed)
  pagewise --inspect-only document.pdf

  # Run as a tracked task, keeping upload and result under ./storage
  pagewise --storage-dir ./storage --json document.pdf

OCR ENGINES:
  auto       primary per page, secondary for pages where primary fails (default)
  primary    vision model only
  secondary  job-based OCR service only, whole document in one job

ENVIRONMENT VARIABLES:
  PRIMARY_OCR_PROVIDER         edgequake-llm provider (openai, anthropic, gemini, ollama, ...)
  PRIMARY_OCR_MODEL            Vision model ID (default deepseek-ai/DeepSeek-OCR)
  PRIMARY_OCR_TIMEOUT          Per-page call timeout in seconds
  OPENAI_API_KEY               Used when no provider is named
  SECONDARY_OCR_API_KEY        Job service token (MINERU_API_KEY also accepted)
  SECONDARY_OCR_BASE_URL       Job service base URL (default https://mineru.net)
  SECONDARY_OCR_MODEL_VERSION  Job service model version (default vlm)
  PDFIUM_LIB_PATH              Path to libpdfium (file or directory)
  RUST_LOG                     Log filter, e.g. pagewise=debug
"#;

/// Convert PDF files and URLs to Markdown, page by page.
#[derive(Parser, Debug)]
#[command(
    name = "pagewise",
    version,
    about = "Convert PDF files and URLs to Markdown, using the text layer where possible and OCR where needed",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "PAGEWISE_OUTPUT")]
    output: Option<PathBuf>,

    /// Rendering DPI for OCR pages (72–300).
    #[arg(long, env = "PAGEWISE_DPI", default_value_t = 144,
          value_parser = clap::value_parser!(u32).range(72..=300))]
    dpi: u32,

    /// Maximum pages converted concurrently.
    #[arg(short, long, env = "PAGEWISE_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// Only the first N pages are analysed and converted (1–1000).
    #[arg(long, env = "PAGEWISE_MAX_PAGES", default_value_t = 100,
          value_parser = clap::value_parser!(u64).range(1..=1000))]
    max_pages: u64,

    /// OCR engine: auto, primary, or secondary.
    #[arg(long, env = "PAGEWISE_OCR_ENGINE", default_value = "auto")]
    ocr_engine: String,

    /// Omit `<!-- Page N -->` markers and page separators.
    #[arg(long)]
    no_page_numbers: bool,

    /// Omit the metadata block.
    #[arg(long)]
    no_metadata: bool,

    /// Flowing prose: no markers, no separators, no metadata.
    #[arg(long)]
    plain: bool,

    /// Title for the metadata block (default: the PDF's own title).
    #[arg(long)]
    title: Option<String>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PAGEWISE_PASSWORD")]
    password: Option<String>,

    /// Retries per page on primary OCR failure.
    #[arg(long, env = "PAGEWISE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Primary OCR provider name (edgequake-llm).
    #[arg(long, env = "PRIMARY_OCR_PROVIDER")]
    primary_provider: Option<String>,

    /// Primary OCR model ID.
    #[arg(long, env = "PRIMARY_OCR_MODEL")]
    primary_model: Option<String>,

    /// Per-page primary OCR timeout in seconds.
    #[arg(long, env = "PRIMARY_OCR_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Secondary OCR service token.
    #[arg(long, env = "SECONDARY_OCR_API_KEY", hide_env_values = true)]
    secondary_api_key: Option<String>,

    /// Secondary OCR service base URL.
    #[arg(long, env = "SECONDARY_OCR_BASE_URL")]
    secondary_base_url: Option<String>,

    /// Output the full result (or task) as JSON instead of Markdown.
    #[arg(long, env = "PAGEWISE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PAGEWISE_NO_PROGRESS")]
    no_progress: bool,

    /// Print the page classification only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Run as a tracked task with uploads and outputs under this directory.
    #[arg(long, env = "PAGEWISE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGEWISE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAGEWISE_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PAGEWISE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose asks for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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
        let config = build_config(&cli, None)?;
        let info = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize document info")?
            );
        } else {
            println!("File:         {}", cli.input);
            if let Some(title) = info.title() {
                println!("Title:        {}", title);
            }
            if let Some(author) = info.metadata.get("author") {
                println!("Author:       {}", author);
            }
            println!("Pages:        {}", info.source_pages);
            if info.truncated() {
                println!("Analysed:     {}", info.total_pages);
            }
            println!("Type:         {}", info.document_type);
            println!("Size:         {} bytes", info.file_size);
            println!();
            for page in &info.pages {
                println!(
                    "  Page {:>4}  text {:>6} chars  images {:>2}  {}",
                    page.page_number,
                    page.text_length,
                    page.image_count,
                    if page.has_tables { "tables" } else { "" }
                );
            }
        }
        return Ok(());
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Task mode ────────────────────────────────────────────────────────
    if let Some(ref root) = cli.storage_dir {
        return run_task(&cli, root, config).await;
    }

    // ── Run conversion ───────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let result = convert_to_file(&cli.input, output_path, &config)
            .await
            .context("Conversion failed")?;

        if !cli.quiet {
            print_summary(&result, Some(output_path));
        }
    } else {
        let result = convert(&cli.input, &config)
            .await
            .context("Conversion failed")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&result).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            let markdown = result.markdown().unwrap_or_default();
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(markdown.as_bytes())
                .context("Failed to write to stdout")?;
            if !markdown.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }

        if !cli.quiet && !cli.json {
            print_summary(&result, None);
        }
    }

    Ok(())
}

fn print_summary(result: &ConversionResult, output_path: Option<&Path>) {
    let meta = &result.metadata;
    let ok = meta.total_pages.saturating_sub(meta.failed_pages);
    let target = output_path
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{}  {}/{} pages  {}ms{}",
        if meta.failed_pages == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        ok,
        meta.total_pages,
        meta.processing_ms,
        target,
    );
    eprintln!(
        "   {} OCR  /  {} text  /  engine {}{}",
        dim(&meta.ocr_pages.to_string()),
        dim(&meta.text_pages.to_string()),
        meta.ocr_engine,
        if meta.truncated {
            format!("  ({} of {} pages)", meta.total_pages, meta.source_pages)
        } else {
            String::new()
        },
    );
}

/// Upload the input into `root`, run it as a task, and report the task.
async fn run_task(cli: &Cli, root: &Path, config: ConversionConfig) -> Result<()> {
    if pagewise::pipeline::input::is_url(&cli.input) {
        anyhow::bail!("--storage-dir takes a local file, not a URL");
    }
    let bytes = tokio::fs::read(&cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input))?;
    let filename = Path::new(&cli.input)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload.pdf".to_string());

    let service = ConversionService::new(
        Arc::new(LocalStorage::new(StorageSettings::under(root))),
        Arc::new(InMemoryTaskStore::new()),
        config,
    );
    let task = service
        .process_upload(&filename, &bytes)
        .await
        .context("Failed to register task")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&task).context("Failed to serialise task")?
        );
    } else if !cli.quiet {
        match (&task.status, &task.result_path, &task.error) {
            (TaskStatus::Completed, Some(path), _) => eprintln!(
                "{}  {}  →  {}",
                green("✔"),
                task.task_id,
                bold(&path.display().to_string())
            ),
            (_, _, Some(err)) => eprintln!("{}  {}  {}", red("✘"), task.task_id, red(err)),
            _ => eprintln!("{}  {}  {}", cyan("⚠"), task.task_id, task.status),
        }
    }

    if task.status == TaskStatus::Failed {
        anyhow::bail!(
            "Task {} failed: {}",
            task.task_id,
            task.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let engine: OcrEngine = cli.ocr_engine.parse().context("Invalid --ocr-engine")?;

    let mut primary = match cli.primary_model {
        Some(ref model) => PrimarySettings::default().with_model(model.clone()),
        None => PrimarySettings::default(),
    };
    primary.provider_name = cli.primary_provider.clone();
    primary.timeout_secs = cli.api_timeout;

    let mut secondary = SecondarySettings::from_env();
    if cli.secondary_api_key.is_some() {
        secondary.api_key = cli.secondary_api_key.clone();
    }
    if let Some(ref url) = cli.secondary_base_url {
        secondary.base_url = url.clone();
    }

    let mut builder = ConversionConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .max_pages(cli.max_pages as usize)
        .ocr_engine(engine)
        .show_page_number(!cli.no_page_numbers)
        .include_metadata(!cli.no_metadata)
        .no_pagination_and_metadata(cli.plain)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .primary_settings(primary)
        .secondary_settings(secondary);

    if let Some(ref title) = cli.title {
        builder = builder.title(title.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
