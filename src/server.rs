use crate::config::Config;
use crate::error::BgError;
use crate::matting::{apply_mask, encode_png};
use crate::provider::{KeySource, Provider, ProviderClient};
use crate::segmentation::{segment_with_fallback, supported_extensions, ModelRegistry};
use crate::storage::{
    allowed_file, result_url, upload_url, MediaStore, ALLOWED_EXTENSIONS, RESULTS_ROUTE,
    UPLOADS_ROUTE,
};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{services::ServeDir, trace::TraceLayer};

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");
const DEFAULT_PROVIDER: &str = "remove.bg";
/// Room for multipart boundaries and text fields on top of the image itself
const FORM_OVERHEAD: usize = 64 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<MediaStore>,
    pub providers: Arc<ProviderClient>,
    pub models: Arc<ModelRegistry>,
}

impl AppState {
    pub fn new(config: Config, keys: KeySource) -> Result<Self, BgError> {
        let store = MediaStore::new(&config.upload_dir, &config.result_dir)?;
        std::fs::create_dir_all(&config.model_dir).map_err(|e| {
            BgError::Storage(format!(
                "Failed to create {}: {}",
                config.model_dir.display(),
                e
            ))
        })?;

        let providers =
            ProviderClient::new(&config.provider_base_url, config.provider_timeout(), keys)?;
        let models = ModelRegistry::new(&config.model_dir, config.model_input_size);

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            providers: Arc::new(providers),
            models: Arc::new(models),
        })
    }
}

/// Processing response
#[derive(Serialize)]
pub struct ProcessResponse {
    pub before: String,
    pub after: String,
    pub method: String,
    pub processing_time_ms: u64,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub configured: bool,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub providers: Vec<ProviderInfo>,
    pub models: Vec<String>,
    pub model_formats: Vec<String>,
    pub default_model: String,
    pub allowed_extensions: Vec<String>,
    pub max_file_size_bytes: usize,
    pub retention_hours: u64,
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, KeySource::Environment)?;

    for provider in Provider::ALL {
        if !state.providers.is_configured(provider) {
            tracing::warn!(
                "{} not set, '{}' requests will return a mock",
                provider.env_var(),
                provider.name()
            );
        }
    }

    tracing::info!(
        "Models in {:?}: {:?}",
        state.models.model_dir(),
        state.models.available()
    );

    if state.config.cleanup_interval_secs > 0 {
        spawn_cleanup(state.clone());
    }

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_file_size + FORM_OVERHEAD;
    let uploads = ServeDir::new(state.store.upload_dir());
    let results = ServeDir::new(state.store.result_dir());

    Router::new()
        .route("/", get(handle_index))
        .route("/process/api", post(handle_process_api))
        .route("/process/local", post(handle_process_local))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .nest_service(UPLOADS_ROUTE, uploads)
        .nest_service(RESULTS_ROUTE, results)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically delete expired uploads and results
fn spawn_cleanup(state: AppState) {
    let period = Duration::from_secs(state.config.cleanup_interval_secs);
    tracing::info!("Cleanup sweep every {}s", period.as_secs());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let store = state.store.clone();
            let retention = state.config.retention();
            if let Err(e) =
                tokio::task::spawn_blocking(move || store.cleanup_older_than(retention)).await
            {
                tracing::error!("Cleanup task failed: {}", e);
            }
        }
    });
}

/// Parsed multipart upload
struct UploadForm {
    filename: String,
    data: Bytes,
    fields: HashMap<String, String>,
}

fn multipart_error(e: MultipartError, max: usize) -> BgError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        BgError::BodyTooLarge { max }
    } else {
        BgError::InvalidRequest(format!("Failed to parse multipart: {}", e))
    }
}

/// Read the `image` file field and any text fields, validating the file
async fn read_upload(state: &AppState, mut multipart: Multipart) -> Result<UploadForm, BgError> {
    let max = state.config.max_file_size;
    let mut image: Option<(String, Bytes)> = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "image" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|e| multipart_error(e, max))?;
                image = Some((filename, data));
            }
            "provider" | "model" => {
                let value = field.text().await.map_err(|e| multipart_error(e, max))?;
                fields.insert(name, value);
            }
            _ => {}
        }
    }

    let (filename, data) = image.ok_or(BgError::NoImage)?;

    if filename.is_empty() || !allowed_file(&filename) {
        return Err(BgError::InvalidFile);
    }

    if data.len() > max {
        return Err(BgError::ImageTooLarge {
            size: data.len(),
            max,
        });
    }

    Ok(UploadForm {
        filename,
        data,
        fields,
    })
}

/// Run file and image work on the blocking pool
async fn blocking<T, F>(task: F) -> Result<T, BgError>
where
    F: FnOnce() -> Result<T, BgError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| BgError::Internal(format!("Processing task failed: {}", e)))?
}

/// Handle the upload page
async fn handle_index(State(state): State<AppState>) -> Result<Html<String>, BgError> {
    let store = state.store.clone();
    let retention = state.config.retention();
    blocking(move || Ok(store.cleanup_older_than(retention))).await?;

    Ok(Html(render_index(&state.config.default_model)))
}

fn render_index(default_model: &str) -> String {
    let options = Provider::ALL
        .iter()
        .map(|p| format!("      <option value=\"{0}\">{0}</option>", p.name()))
        .collect::<Vec<_>>()
        .join("\n");

    INDEX_TEMPLATE
        .replace("{{ provider_options }}", &options)
        .replace("{{ default_model }}", &escape_html(default_model))
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Handle provider-backed background removal
async fn handle_process_api(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ProcessResponse>, BgError> {
    let start = Instant::now();
    let upload = read_upload(&state, multipart).await?;

    // An empty value is kept and resolves to no provider
    let provider = upload
        .fields
        .get("provider")
        .cloned()
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());

    let store = state.store.clone();
    let (filename, data) = (upload.filename, upload.data.clone());
    let stored = blocking(move || store.save_upload(&filename, &data)).await?;

    let output = state
        .providers
        .remove_background(&provider, &upload.data)
        .await?;

    let store = state.store.clone();
    let bytes = output.bytes;
    let result = blocking(move || store.save_result(&bytes)).await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        "Provider '{}' finished in {}ms ({})",
        provider,
        processing_time_ms,
        output.outcome.as_str()
    );

    Ok(Json(ProcessResponse {
        before: upload_url(&stored),
        after: result_url(&result),
        method: output.outcome.as_str().to_string(),
        processing_time_ms,
    }))
}

/// Handle local model background removal
async fn handle_process_local(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ProcessResponse>, BgError> {
    let start = Instant::now();
    let upload = read_upload(&state, multipart).await?;

    // An empty value is kept, the registry rejects it and the heuristic runs
    let model_name = upload
        .fields
        .get("model")
        .cloned()
        .unwrap_or_else(|| state.config.default_model.clone());

    let models = state.models.clone();
    let store = state.store.clone();
    let (filename, data) = (upload.filename, upload.data);
    let (stored, result, method) = blocking(move || {
        let stored = store.save_upload(&filename, &data)?;
        let image = image::load_from_memory(&data).map_err(|e| BgError::Decode(e.to_string()))?;
        let (mask, method) = segment_with_fallback(&models, &model_name, &image.to_rgb8())?;
        let cutout = encode_png(&apply_mask(&image, &mask))?;
        let result = store.save_result(&cutout)?;
        Ok((stored, result, method))
    })
    .await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        "Local removal finished in {}ms ({})",
        processing_time_ms,
        method
    );

    Ok(Json(ProcessResponse {
        before: upload_url(&stored),
        after: result_url(&result),
        method,
        processing_time_ms,
    }))
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: Provider::ALL
            .iter()
            .map(|&p| ProviderInfo {
                name: p.name().to_string(),
                configured: state.providers.is_configured(p),
            })
            .collect(),
        models: state.models.available(),
        model_formats: supported_extensions().into_iter().map(String::from).collect(),
        default_model: state.config.default_model.clone(),
        allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        max_file_size_bytes: state.config.max_file_size,
        retention_hours: state.config.retention_hours,
    })
}
