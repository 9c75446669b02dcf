//! HTTP server binary for coverscan.
//!
//! Wires the scanner, record store and identity provider from flags and
//! environment, then serves `coverscan::server::router`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use coverscan::config::{DEFAULT_API_BASE_URL, DEFAULT_MODEL};
use coverscan::pipeline::storage::DEFAULT_BUCKET;
use coverscan::records::{SharedIdentity, SharedRecordStore};
use coverscan::server::{router, AppState, ServiceStatus};
use coverscan::{
    BlobStore, CoverScanner, DirectoryBlobStore, MemoryRecordStore, OpenAiVisionClient,
    ScanConfig, StaticIdentity, SupabaseIdentity, SupabaseStorage,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Serve the cover-scanning API.
#[derive(Parser, Debug)]
#[command(name = "coverscan-server", version, about = "Serve the cover-scanning HTTP API")]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "COVERSCAN_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

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

    /// Supabase project URL (storage and auth).
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: Option<String>,

    /// Supabase API key.
    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    supabase_key: Option<String>,

    /// Supabase storage bucket.
    #[arg(long, env = "COVERSCAN_BUCKET", default_value = DEFAULT_BUCKET)]
    bucket: String,

    /// Store uploads under this directory instead of Supabase.
    #[arg(long, env = "COVERSCAN_STORAGE_DIR", requires = "public_base_url")]
    storage_dir: Option<PathBuf>,

    /// Public URL that serves `--storage-dir`.
    #[arg(long, env = "COVERSCAN_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Accept `TOKEN` as a bearer token for `USER_ID` (repeatable).
    /// Used instead of Supabase auth when no Supabase project is configured.
    #[arg(long = "dev-user", value_name = "TOKEN=USER_ID", value_parser = parse_dev_user)]
    dev_users: Vec<(String, String)>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "COVERSCAN_VERBOSE")]
    verbose: bool,
}

fn parse_dev_user(s: &str) -> Result<(String, String), String> {
    StaticIdentity::parse_pair(s).ok_or_else(|| format!("expected TOKEN=USER_ID, got '{s}'"))
}

/// Wait for SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else {
        "info,tower_http=debug"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = ScanConfig::builder()
        .maybe_api_key(cli.api_key.clone())
        .model(&cli.model)
        .api_base_url(&cli.api_base)
        .api_timeout_secs(cli.api_timeout)
        .build()
        .context("Invalid configuration")?;
    let status = ServiceStatus {
        openai_key_exists: config.has_api_key(),
        supabase_url_exists: cli.supabase_url.is_some(),
        supabase_key_exists: cli.supabase_key.is_some(),
    };
    if !status.openai_key_exists {
        // Served anyway; scans answer with an Unconfigured error.
        warn!("OPENAI_API_KEY is not set; scan requests will fail");
    }
    let model = Arc::new(OpenAiVisionClient::new(config)?);

    let supabase = cli.supabase_url.as_deref().zip(cli.supabase_key.as_deref());

    let store: Arc<dyn BlobStore> = match (supabase, &cli.storage_dir, &cli.public_base_url) {
        (_, Some(dir), Some(base)) => Arc::new(
            DirectoryBlobStore::new(dir, base).context("Invalid storage directory configuration")?,
        ),
        (Some((url, key)), _, _) => Arc::new(
            SupabaseStorage::new(url, key, cli.bucket.as_str(), cli.api_timeout)
                .context("Invalid Supabase configuration")?,
        ),
        _ => bail!(
            "No storage backend configured.\n\
             Set SUPABASE_URL and SUPABASE_KEY, or --storage-dir with --public-base-url."
        ),
    };

    let identity: SharedIdentity = match supabase {
        Some((url, key)) if cli.dev_users.is_empty() => Arc::new(
            SupabaseIdentity::new(url, key, cli.api_timeout).context("Invalid Supabase configuration")?,
        ),
        _ => {
            if cli.dev_users.is_empty() {
                warn!("No identity provider configured; authenticated routes will answer 401");
            }
            let ids = cli
                .dev_users
                .iter()
                .fold(StaticIdentity::new(), |ids, (token, user)| {
                    ids.with_user(token.as_str(), user.as_str())
                });
            Arc::new(ids)
        }
    };

    let records: SharedRecordStore = Arc::new(MemoryRecordStore::new());

    info!(
        store = store.name(),
        model = %cli.model,
        "Scanner ready"
    );
    let state = AppState {
        scanner: Arc::new(CoverScanner::new(store, model)),
        records,
        identity,
        status,
    };

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!(addr = %cli.bind, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}
