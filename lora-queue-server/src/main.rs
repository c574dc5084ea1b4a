use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use clap::Parser;
use lora_queue_core::{
    image_to_png, BatchOptions, CatalogConfig, DiskSink, GenerationRequest, ImageSink, LoraQueue,
    TracingReporter,
};
use serde::{Deserialize, Serialize};
use tokio::{
    self,
    net::TcpListener,
    sync::Mutex,
    task::{JoinError, JoinHandle},
};
use tracing::{error, info};

mod engine;
mod font;
mod logging;
mod settings;

use engine::RemoteEngine;
use font::GlyphRenderer;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "LoRA batch queue server")]
struct Args {
    /// Directory holding the LoRA files; every path is confined to it
    #[arg(long)]
    root: PathBuf,

    /// Base URL of the image generation server
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    engine_url: String,

    /// Save generated images and grids into this directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// TOML file with default batch options
    #[arg(long)]
    config: Option<PathBuf>,

    /// Default font for grid labels
    #[arg(long)]
    font: Option<PathBuf>,

    /// Name models by file name instead of their embedded metadata
    #[arg(long)]
    prefer_filename: bool,

    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8001)]
    port: u16,
}

struct AppState {
    queue: LoraQueue,
    renderer: GlyphRenderer,
    reporter: TracingReporter,
    defaults: BatchOptions,
    engine_url: String,
    output_dir: Option<PathBuf>,
    // The engine is single-slot, so batches run one at a time.
    batch_lock: Arc<Mutex<()>>,
}

#[derive(Deserialize)]
struct DirectoryQuery {
    base_dir: Option<String>,
}

#[derive(Serialize)]
struct DirectoryResponse {
    choices: Vec<String>,
}

#[derive(Deserialize)]
struct ModelQuery {
    base_dir: Option<String>,
    /// All directories when omitted or empty.
    #[serde(default)]
    directories: Vec<String>,
}

#[derive(Serialize)]
struct ModelResponse {
    models: Vec<String>,
}

#[derive(Deserialize)]
struct BatchRequest {
    request: GenerationRequest,
    options: Option<BatchOptions>,
}

#[derive(Serialize)]
struct BatchResponse {
    images: Vec<String>,
    prompts: Vec<String>,
    infotexts: Vec<String>,
    seed: Option<u64>,
    info: String,
    grid_rows: Option<usize>,
    saved: Vec<PathBuf>,
    interrupted: bool,
}

fn error_response(err: anyhow::Error) -> Response {
    let status = match err.downcast_ref::<lora_queue_core::Error>() {
        Some(lora_queue_core::Error::PathViolation(_)) => StatusCode::FORBIDDEN,
        Some(lora_queue_core::Error::Engine(_)) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!("Request failed: {:#}", err);
    (status, format!("Error: {:#}", err)).into_response()
}

fn respond<T: Serialize>(joined: std::result::Result<Result<T>, JoinError>) -> Response {
    match joined {
        Ok(Ok(body)) => Json(body).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(err) => error_response(err.into()),
    }
}

/// Runs filesystem or engine work off the async runtime.
async fn blocking<T, F>(state: &Arc<AppState>, work: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(&AppState) -> Result<T> + Send + 'static,
{
    let state = Arc::clone(state);
    respond(tokio::task::spawn_blocking(move || work(&state)).await)
}

/// Runs `work` on the blocking pool while holding `lock`. The slot stays
/// taken until `work` returns, even if the caller stops waiting for it.
async fn exclusive<T, F>(lock: &Arc<Mutex<()>>, work: F) -> JoinHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let slot = Arc::clone(lock).lock_owned().await;
    tokio::task::spawn_blocking(move || {
        let _slot = slot;
        work()
    })
}

async fn directories_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DirectoryQuery>,
) -> Response {
    blocking(&state, move |state| {
        Ok(DirectoryResponse {
            choices: state.queue.directory_choices(query.base_dir.as_deref()),
        })
    })
    .await
}

async fn models_handler(
    State(state): State<Arc<AppState>>,
    Json(query): Json<ModelQuery>,
) -> Response {
    blocking(&state, move |state| {
        Ok(ModelResponse {
            models: state
                .queue
                .model_choices(query.base_dir.as_deref(), &query.directories),
        })
    })
    .await
}

async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<BatchRequest>,
) -> Response {
    let shared = Arc::clone(&state);
    let task = exclusive(&state.batch_lock, move || {
        shared.reporter.reset();
        run_batch(batch, &shared)
    })
    .await;
    respond(task.await)
}

async fn interrupt_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    info!("Interrupt requested");
    state.reporter.interrupt();
    StatusCode::ACCEPTED
}

/// Runs one batch against the remote engine and encodes the results.
fn run_batch(batch: BatchRequest, state: &AppState) -> Result<BatchResponse> {
    let options = batch.options.unwrap_or_else(|| state.defaults.clone());
    let mut engine = RemoteEngine::new(&state.engine_url);
    let mut sink = state.output_dir.as_ref().map(DiskSink::new).transpose()?;

    let outcome = state.queue.run(
        &batch.request,
        &options,
        &mut engine,
        &state.renderer,
        sink.as_mut().map(|sink| sink as &mut dyn ImageSink),
        &state.reporter,
    )?;

    let images = outcome
        .images
        .iter()
        .map(|image| -> Result<String> { Ok(BASE64_STANDARD.encode(image_to_png(image)?)) })
        .collect::<Result<Vec<_>>>()?;

    Ok(BatchResponse {
        images,
        prompts: outcome.prompts,
        infotexts: outcome.infotexts,
        seed: outcome.seed,
        info: outcome.info,
        grid_rows: outcome.grid_rows,
        saved: outcome.saved,
        interrupted: outcome.interrupted,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logger();
    let args = Args::parse();

    let config = CatalogConfig::new(&args.root)
        .with_context(|| format!("invalid LoRA root {}", args.root.display()))?
        .with_prefer_filename(args.prefer_filename);
    let defaults = settings::load_batch_defaults(args.config.as_deref())
        .context("failed to load batch defaults")?;
    info!("Serving LoRAs from {}", config.root().display());

    // Build application state and wrap in Arc.
    let app_state = AppState {
        queue: LoraQueue::new(&config),
        renderer: GlyphRenderer::new(args.font.as_deref()),
        reporter: TracingReporter::new(),
        defaults,
        engine_url: args.engine_url,
        output_dir: args.output_dir,
        batch_lock: Arc::new(Mutex::new(())),
    };
    let shared_state = Arc::new(app_state);

    // --- Build axum router with shared state ---
    let app = Router::new()
        .route("/v1/loras/directories", get(directories_handler))
        .route("/v1/loras/models", post(models_handler))
        .route("/v1/loras/batch", post(batch_handler))
        .route("/v1/loras/interrupt", post(interrupt_handler))
        .with_state(shared_state);

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    info!("Started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
