use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tagline::config::ResourceConfig;
use tagline::model::{ModelLoader, ModelStatus};
use tagline::system::SystemStatus;
use tagline::{BatchProcessor, CaptionError, LoadOptions, ModelError};

const INDEX_HTML: &str = include_str!("index.html");

/// Shared state of the web UI. Batches are serialized by the processor lock.
pub struct AppState<L: ModelLoader> {
    processor: Mutex<BatchProcessor<L>>,
    model_status: Mutex<ModelStatus>,
    stop: Arc<AtomicBool>,
    resources: ResourceConfig,
    detail_window: usize,
    /// shown by the status route until a batch has loaded the model
    options: LoadOptions,
    accelerator: Option<String>,
}

impl<L: ModelLoader> AppState<L> {
    pub fn new(processor: BatchProcessor<L>, resources: ResourceConfig) -> Self {
        let model_status = processor.handle().status();
        let detail_window = processor.config().detail_window;
        Self {
            processor: Mutex::new(processor),
            model_status: Mutex::new(model_status),
            stop: Arc::new(AtomicBool::new(false)),
            resources,
            detail_window,
            options: LoadOptions::default(),
            accelerator: None,
        }
    }

    pub fn with_device(mut self, options: LoadOptions, accelerator: Option<&str>) -> Self {
        self.options = options;
        self.accelerator = accelerator.map(str::to_string);
        self
    }

    #[inline]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }
}

#[derive(Debug, Deserialize)]
pub struct CaptionBody {
    folder_path: String,
    #[serde(default)]
    use_quantized: bool,
    #[serde(default)]
    use_cpu: bool,
}

pub fn router<L>(state: Arc<AppState<L>>) -> Router
where
    L: ModelLoader + Send + 'static,
{
    Router::new()
        .route("/", get(|| async { Html(INDEX_HTML) }))
        .route("/api/v0/caption", post(caption::<L>))
        .route("/api/v0/stop", post(stop::<L>))
        .route("/api/v0/status", get(status::<L>))
        .with_state(state)
}

/// Serve the web UI until Ctrl-C.
pub async fn serve<L>(state: Arc<AppState<L>>, port: u16) -> Result<(), Box<dyn std::error::Error>>
where
    L: ModelLoader + Send + 'static,
{
    let stop = state.stop_flag();
    let app = router(state);

    let address = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    log::info!("🚀 Starting the server");
    log::info!("🔥 Listening on: http://{address}");
    log::info!("🔧 Press Ctrl+C to stop the server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Received Ctrl-C signal, stopping the running batch");
                stop.store(true, Ordering::SeqCst);
            }
        })
        .await?;

    Ok(())
}

fn error_status(e: &CaptionError) -> StatusCode {
    match e {
        CaptionError::InvalidFolder(_) => StatusCode::BAD_REQUEST,
        CaptionError::ReadFolder { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CaptionError::Model(ModelError::OptionsMismatch { .. }) => StatusCode::CONFLICT,
        CaptionError::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<serde_json::Value>) {
    log::error!("{message}");
    (status, Json(serde_json::json!({ "error": message })))
}

async fn caption<L>(
    State(state): State<Arc<AppState<L>>>,
    Json(body): Json<CaptionBody>,
) -> impl IntoResponse
where
    L: ModelLoader + Send + 'static,
{
    let options = LoadOptions::new(body.use_quantized, body.use_cpu);
    let window = state.detail_window;

    let task = tokio::task::spawn_blocking(move || {
        let mut processor = state.processor.lock().map_err(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "the batch processor is poisoned".to_string(),
            )
        })?;
        state.stop.store(false, Ordering::SeqCst);

        let mut stop = state.stop.clone();
        let result = processor.process_folder_with(body.folder_path.trim(), options, &mut stop);

        if let Ok(mut status) = state.model_status.lock() {
            *status = processor.handle().status();
        }

        result.map_err(|e| (error_status(&e), e.to_string()))
    });

    match task.await {
        Ok(Ok(report)) => {
            let summary = report.summary(window);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "summary": summary,
                    "success_rate": report.success_rate(),
                    "report": report,
                })),
            )
        }
        Ok(Err((status, message))) => error_response(status, message),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn stop<L>(State(state): State<Arc<AppState<L>>>) -> impl IntoResponse
where
    L: ModelLoader + Send + 'static,
{
    log::info!("Stop requested, the batch ends after the current image");
    state.stop.store(true, Ordering::SeqCst);
    Json(serde_json::json!({ "stopping": true }))
}

async fn status<L>(State(state): State<Arc<AppState<L>>>) -> impl IntoResponse
where
    L: ModelLoader + Send + 'static,
{
    let busy = state.processor.try_lock().is_err();
    let model = match state.model_status.lock() {
        Ok(status) => status.clone(),
        Err(_) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "the model status is poisoned".to_string(),
            )
        }
    };

    let resources = state.resources.clone();
    let options = state.options;
    let accelerator = state.accelerator.clone();
    let probe = move || SystemStatus::probe(model, options, accelerator.as_deref(), &resources);
    match tokio::task::spawn_blocking(probe).await {
        Ok(system) => {
            let text = system.to_string();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "busy": busy,
                    "system": system,
                    "text": text,
                })),
            )
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tagline::config::CaptionConfig;
    use tagline::model::{LoadedModel, ModelDirectory};
    use tower::ServiceExt;

    struct NoModel;

    impl ModelLoader for NoModel {
        fn load(&self, _: &ModelDirectory, _: &LoadOptions) -> Result<LoadedModel, ModelError> {
            Err(ModelError::Load("no model in tests".to_string()))
        }
    }

    fn app() -> (Router, Arc<AppState<NoModel>>) {
        let mut config = CaptionConfig::default();
        config.model.dir = "/definitely/not/a/model".into();
        let processor = BatchProcessor::from_config(NoModel, &config);
        let state = Arc::new(
            AppState::new(processor, config.resources)
                .with_device(LoadOptions::new(false, true), None),
        );
        (router(state.clone()), state)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Result<Request<Body>, axum::http::Error> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        serde_json::from_slice(&bytes).unwrap_or_default()
    }

    #[tokio::test]
    async fn index_page() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn empty_folder_path_is_bad_request() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _) = app();
        let response = app
            .oneshot(post_json(
                "/api/v0/caption",
                serde_json::json!({ "folder_path": "  " }),
            )?)
            .await?;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().is_some_and(|e| e.contains("empty")));
        Ok(())
    }

    #[tokio::test]
    async fn folder_without_images_reports_summary() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let (app, state) = app();
        let response = app
            .oneshot(post_json(
                "/api/v0/caption",
                serde_json::json!({
                    "folder_path": tmp_dir.path(),
                    "use_cpu": true,
                }),
            )?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["report"]["status"], "no_eligible_files");
        assert!(body["summary"]
            .as_str()
            .is_some_and(|s| s.contains("No supported images")));
        assert!(!state.model_status.lock().map(|s| s.loaded).unwrap_or(true));
        Ok(())
    }

    #[tokio::test]
    async fn missing_model_is_server_error() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        std::fs::write(tmp_dir.path().join("a.jpg"), b"x")?;

        let (app, _) = app();
        let response = app
            .oneshot(post_json(
                "/api/v0/caption",
                serde_json::json!({ "folder_path": tmp_dir.path() }),
            )?)
            .await?;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!tmp_dir.path().join("a.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn stop_raises_the_flag() -> Result<(), Box<dyn std::error::Error>> {
        let (app, state) = app();
        let response = app
            .oneshot(post_json("/api/v0/stop", serde_json::json!({}))?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.stop_flag().load(Ordering::SeqCst));
        Ok(())
    }

    #[tokio::test]
    async fn status_reports_model_state() -> Result<(), Box<dyn std::error::Error>> {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/api/v0/status").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["busy"], false);
        assert_eq!(body["system"]["model"]["loaded"], false);
        assert_eq!(body["system"]["requested"]["device"], "cpu");
        assert!(body["system"]["accelerator"].is_null());
        assert!(body["text"]
            .as_str()
            .is_some_and(|t| t.contains("Accelerator: none")));
        Ok(())
    }
}
