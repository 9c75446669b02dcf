//! CLI binary for coverscan.
//!
//! A thin shim over the library crate that maps CLI flags to a
//! `CoverScanner` and prints the detected title and author.

use anyhow::{bail, Context, Result};
use clap::Parser;
use coverscan::config::{DEFAULT_API_BASE_URL, DEFAULT_MODEL};
use coverscan::pipeline::storage::DEFAULT_BUCKET;
use coverscan::{
    sniff_mime_type, BlobStore, CoverError, CoverScanner, DirectoryBlobStore, ExtractedMetadata,
    ExtractionTier, MemoryBlobStore, OpenAiVisionClient, ProgressCallback, ScanConfig,
    ScanProgressCallback, ScanStage, SupabaseStorage, UploadRequest,
};
use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner that logs one line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Scanning");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

fn stage_label(stage: ScanStage) -> &'static str {
    match stage {
        ScanStage::Validating => "Checking upload",
        ScanStage::Storing => "Uploading cover",
        ScanStage::Inferring => "Reading cover",
        ScanStage::Parsing => "Parsing reply",
    }
}

impl ScanProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: ScanStage) {
        self.bar.set_message(format!("{}…", stage_label(stage)));
    }

    fn on_stage_complete(&self, stage: ScanStage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<16} {}",
            green("✓"),
            stage_label(stage),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_stage_error(&self, stage: ScanStage, error: &CoverError) {
        self.bar.println(format!(
            "  {} {:<16} {}",
            red("✗"),
            stage_label(stage),
            red(error.kind().summary()),
        ));
        self.bar.finish_and_clear();
    }

    fn on_scan_complete(&self, _metadata: &ExtractedMetadata) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scan a local photo, keeping the upload in a directory served elsewhere
  coverscan --storage-dir ./covers --public-base-url https://cdn.example.com/covers/ dune.jpg

  # Scan a local photo into a Supabase bucket
  coverscan --supabase-url https://xyz.supabase.co --supabase-key $KEY dune.jpg

  # Read a cover that is already online (no storage needed)
  coverscan https://covers.example.com/dune.jpg

  # JSON output
  coverscan --json https://covers.example.com/dune.jpg

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY             Completion service API key (required)
  COVERSCAN_MODEL            Override model ID
  COVERSCAN_API_BASE         OpenAI-compatible base URL
  COVERSCAN_API_TIMEOUT      Inference timeout in seconds
  SUPABASE_URL, SUPABASE_KEY Supabase project for blob storage
  COVERSCAN_BUCKET           Storage bucket (default: book-covers)
  COVERSCAN_STORAGE_DIR      Store uploads in a local directory instead
  COVERSCAN_PUBLIC_BASE_URL  Public URL that serves COVERSCAN_STORAGE_DIR

  The model fetches the image by URL, so a directory store is only useful
  when its public base URL is reachable from the completion service.
"#;

/// Read a book's title and author from a cover photo.
#[derive(Parser, Debug)]
#[command(
    name = "coverscan",
    version,
    about = "Read a book's title and author from a cover photo using a Vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image path or HTTP/HTTPS URL.
    input: String,

    /// Owner recorded in the storage key.
    #[arg(long, env = "COVERSCAN_OWNER", default_value = "local")]
    owner: String,

    /// Completion service API key.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Vision model ID.
    #[arg(long, env = "COVERSCAN_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// OpenAI-compatible API base URL.
    #[arg(long, env = "COVERSCAN_API_BASE", default_value = DEFAULT_API_BASE_URL)]
    api_base: String,

    /// Inference timeout in seconds.
    #[arg(long, env = "COVERSCAN_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Supabase project URL.
    #[arg(long, env = "SUPABASE_URL", requires = "supabase_key")]
    supabase_url: Option<String>,

    /// Supabase API key.
    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    supabase_key: Option<String>,

    /// Supabase storage bucket.
    #[arg(long, env = "COVERSCAN_BUCKET", default_value = DEFAULT_BUCKET)]
    bucket: String,

    /// Store uploads under this directory instead of Supabase.
    #[arg(long, env = "COVERSCAN_STORAGE_DIR", conflicts_with = "supabase_url", requires = "public_base_url")]
    storage_dir: Option<PathBuf>,

    /// Public URL that serves `--storage-dir`.
    #[arg(long, env = "COVERSCAN_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Output structured JSON instead of text.
    #[arg(long, env = "COVERSCAN_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "COVERSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "COVERSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the result.
    #[arg(short, long, env = "COVERSCAN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters, so library logs stay
    // at ERROR while it is shown.
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

    // ── Build scanner ────────────────────────────────────────────────────
    let config = ScanConfig::builder()
        .maybe_api_key(cli.api_key.clone())
        .model(&cli.model)
        .api_base_url(&cli.api_base)
        .api_timeout_secs(cli.api_timeout)
        .build()
        .context("Invalid configuration")?;
    let model = Arc::new(OpenAiVisionClient::new(config)?);

    let is_url = cli.input.starts_with("http://") || cli.input.starts_with("https://");
    let store: Arc<dyn BlobStore> = match build_store(&cli)? {
        Some(store) => store,
        None if is_url => Arc::new(MemoryBlobStore::new("memory://covers/".parse()?)),
        None => bail!(
            "A storage backend is required to scan a local file.\n\
             Pass --supabase-url/--supabase-key, or --storage-dir with --public-base-url."
        ),
    };

    let mut scanner = CoverScanner::new(store, model);
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        scanner = scanner.with_progress(cb);
    }

    // ── Run scan ─────────────────────────────────────────────────────────
    let (metadata, tier, stored) = if is_url {
        let extraction = scanner
            .extract_from_url(&cli.input)
            .await
            .context("Scan failed")?;
        (extraction.metadata, extraction.tier, None)
    } else {
        let request = read_upload(Path::new(&cli.input), &cli.owner).await?;
        let output = scanner.run(request).await.context("Scan failed")?;
        if !cli.quiet && !cli.json {
            eprintln!(
                "   {}  {}ms total",
                dim(&format!(
                    "{} tokens in  /  {} tokens out",
                    output.stats.input_tokens.unwrap_or(0),
                    output.stats.output_tokens.unwrap_or(0)
                )),
                output.stats.total_duration_ms,
            );
        }
        (output.metadata, output.tier, Some(output.image))
    };

    // ── Print result ─────────────────────────────────────────────────────
    if cli.json {
        let body = json!({
            "title": metadata.title,
            "author": metadata.author,
            "tier": tier,
            "detected": !metadata.is_empty(),
            "image": stored,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).context("Failed to serialise output")?
        );
    } else {
        print_field("Title", &metadata.title);
        print_field("Author", &metadata.author);
        if let Some(ref image) = stored {
            if !cli.quiet {
                eprintln!("{}  {}", dim("Stored:"), image.public_url);
            }
        }
    }

    if metadata.is_empty() && !cli.quiet {
        eprintln!(
            "{} No title or author could be read from this cover. Enter the details manually.",
            yellow("⚠")
        );
    } else if tier == ExtractionTier::Pattern && cli.verbose {
        eprintln!("{}", dim("(recovered from a non-JSON reply)"));
    }

    Ok(())
}

fn print_field(label: &str, value: &str) {
    if value.is_empty() {
        println!("{:<7} {}", bold(label), dim("(not detected)"));
    } else {
        println!("{:<7} {}", bold(label), value);
    }
}

/// Select the blob store from the CLI flags. `None` when none is configured.
fn build_store(cli: &Cli) -> Result<Option<Arc<dyn BlobStore>>> {
    if let (Some(url), Some(key)) = (&cli.supabase_url, &cli.supabase_key) {
        let store = SupabaseStorage::new(url.as_str(), key.as_str(), cli.bucket.as_str(), cli.api_timeout)
            .context("Invalid Supabase configuration")?;
        return Ok(Some(Arc::new(store)));
    }
    if let (Some(dir), Some(base)) = (&cli.storage_dir, &cli.public_base_url) {
        let store = DirectoryBlobStore::new(dir, base).context("Invalid storage directory configuration")?;
        return Ok(Some(Arc::new(store)));
    }
    Ok(None)
}

/// Read a local image and declare its MIME type from its content, falling
/// back to the file extension.
async fn read_upload(path: &Path, owner: &str) -> Result<UploadRequest> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mime_type = sniff_mime_type(&bytes)
        .or_else(|| ImageFormat::from_path(path).ok().map(|f| f.to_mime_type()))
        .unwrap_or("application/octet-stream");
    Ok(UploadRequest::new(owner, bytes, mime_type))
}
