//! fileconv Server
//!
//! Accepts multipart uploads, converts them inside a per-task directory and
//! returns the result directly (one artifact) or as a zip archive (several).
//!
//! ## Endpoints
//!
//! - `GET /` upload form
//! - `POST /upload` convert files for one operation
//! - `GET /download/:task_id/:filename` fetch an artifact of a previous task
//! - `GET /sitemap.xml`, `GET /robots.txt` static passthrough
//! - `GET /health` liveness
//!
//! Office formats are converted by a headless office suite (`soffice`);
//! images and PDF merges are handled in-process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use fileconv_core::{
    CapabilityRegistry, ConversionService, OperationRouter, ToolConfig, Workspace,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;

use api::{handle_download, handle_health, handle_index, handle_upload};

const DEFAULT_PORT: u16 = 10000;

/// Upper bound between two retention sweeps
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Command-line arguments for the fileconv server
#[derive(Parser, Debug)]
#[command(name = "fileconv-server")]
#[command(about = "File conversion server: PDF/Word/slides/images in, converted files out")]
struct Args {
    /// Port to listen on (falls back to $PORT, then 10000)
    #[arg(short, long, env = "FILECONV_PORT")]
    port: Option<u16>,

    /// Host address to bind to
    #[arg(long, env = "FILECONV_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Root holding uploads/ and outputs/
    #[arg(long, env = "FILECONV_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Directory serving sitemap.xml and robots.txt
    #[arg(long, env = "FILECONV_STATIC_DIR", default_value = "static")]
    static_dir: PathBuf,

    /// Office suite binary used for document and presentation conversions
    #[arg(long, env = "FILECONV_SOFFICE", default_value = "soffice")]
    soffice: PathBuf,

    /// Per-file timeout for office conversions, in seconds
    #[arg(long, env = "FILECONV_TIMEOUT_SECS", default_value = "120")]
    timeout_secs: u64,

    /// Delete tasks and staged uploads older than this many hours
    #[arg(long, env = "FILECONV_RETENTION_HOURS", value_parser = clap::value_parser!(u64).range(1..))]
    retention_hours: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConversionService>,
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(service: ConversionService, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            service: Arc::new(service),
            static_dir: static_dir.into(),
        }
    }
}

/// Assemble routes and middleware around `state`.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let sitemap = ServeFile::new(state.static_dir.join("sitemap.xml"));
    let robots = ServeFile::new(state.static_dir.join("robots.txt"));

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/download/:task_id/:filename", get(handle_download))
        .route_service("/sitemap.xml", sitemap)
        .route_service("/robots.txt", robots)
        // Upload size is not limited
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Periodically evict tasks older than `max_age`.
fn spawn_retention_sweep(workspace: Workspace, max_age: Duration) {
    let period = max_age.min(MAX_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = workspace.evict_older_than(max_age).await {
                warn!("Retention sweep failed: {}", e);
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = args
        .port
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(DEFAULT_PORT);

    info!("Starting fileconv server on {}:{}", args.host, port);

    let workspace = Workspace::new(&args.data_dir);
    workspace.ensure_layout().await?;

    let tools = ToolConfig {
        soffice_path: args.soffice.clone(),
        timeout: Duration::from_secs(args.timeout_secs),
    };
    let router = OperationRouter::new(CapabilityRegistry::with_defaults(tools));
    let service = ConversionService::new(workspace.clone(), router);

    if let Some(hours) = args.retention_hours {
        let max_age = Duration::from_secs(hours * 3600);
        spawn_retention_sweep(workspace, max_age);
        info!("Retention: tasks older than {}h are deleted", hours);
    }

    let app = build_app(AppState::new(service, &args.static_dir));

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Data directory: {}", args.data_dir.display());
    info!(
        "Office suite: {} (timeout {}s)",
        args.soffice.display(),
        args.timeout_secs
    );

    axum::serve(listener, app).await?;

    Ok(())
}
