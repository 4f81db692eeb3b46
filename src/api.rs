//! REST API server for the financial document analyzer
//!
//! Exposes synchronous and queued analysis plus the job and history views.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AnalysisError, ErrorBody, ErrorKind};
use crate::jobs::JobRunner;
use crate::models::{AnalysisResponse, JobPriority};
use crate::store::AnalysisStore;
use crate::Result;

/// Headroom for multipart framing on top of the document limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_CLEANUP_DAYS: u32 = 30;
const MAX_CLEANUP_DAYS: u32 = 36_500;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct SampleParams {
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupParams {
    pub days_old: Option<u32>,
}

/// Fields of an analysis upload form.
#[derive(Debug, Default)]
struct UploadForm {
    filename: Option<String>,
    content_type: Option<String>,
    bytes: Option<Vec<u8>>,
    query: Option<String>,
    priority: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<ErrorBody>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(body: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(body),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::VerificationFailed | ErrorKind::InvalidInput => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        // nginx's "client closed request"
        ErrorKind::Cancelled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
        }
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let body = self.to_body();
        if body.kind == ErrorKind::InternalError {
            error!(error = ?self, "Request failed with internal error");
        }
        (status_for(body.kind), Json(ApiResponse::error(body))).into_response()
    }
}

impl IntoResponse for AnalysisResponse {
    fn into_response(self) -> Response {
        let status = match &self.error {
            Some(body) => status_for(body.kind),
            None => StatusCode::OK,
        };
        (status, Json(self)).into_response()
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub runner: JobRunner,
    pub analyses: Arc<dyn AnalysisStore>,
}

/// =============================
/// Helpers
/// =============================

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AnalysisError {
    AnalysisError::Validation(format!("Invalid multipart body: {}", e))
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                form.filename = field.file_name().map(|n| n.to_string());
                form.content_type = field.content_type().map(|c| c.to_string());
                form.bytes = Some(field.bytes().await.map_err(multipart_error)?.to_vec());
            }
            Some("query") => form.query = Some(field.text().await.map_err(multipart_error)?),
            Some("priority") => {
                form.priority = Some(field.text().await.map_err(multipart_error)?)
            }
            _ => {}
        }
    }

    Ok(form)
}

impl UploadForm {
    async fn accept(
        self,
        runner: &JobRunner,
    ) -> Result<(crate::document::StoredDocument, Option<String>, Option<String>)> {
        let bytes = self
            .bytes
            .ok_or_else(|| AnalysisError::Validation("Missing file in multipart form".into()))?;
        let filename = self.filename.unwrap_or_default();

        let stored = runner
            .documents()
            .accept_upload(&filename, self.content_type.as_deref(), bytes)
            .await?;
        Ok((stored, self.query, self.priority))
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let tools: Vec<serde_json::Value> = state
        .runner
        .pipeline()
        .tools()
        .list()
        .into_iter()
        .map(|(kind, name)| serde_json::json!({ "kind": kind, "name": name }))
        .collect();

    Json(serde_json::json!({
        "status": "healthy",
        "tools": tools,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Analysis Endpoints
/// =============================

/// Run the analysis inline. A dropped connection cancels the run.
async fn analyze(State(state): State<ApiState>, multipart: Multipart) -> Response {
    let (stored, query, _) = match read_form(multipart).await {
        Ok(form) => match form.accept(&state.runner).await {
            Ok(accepted) => accepted,
            Err(e) => return e.into_response(),
        },
        Err(e) => return e.into_response(),
    };

    info!(
        filename = %stored.document().filename,
        size = stored.document().size(),
        "Received analysis request"
    );

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let response = state
        .runner
        .run_sync(stored, query.as_deref(), cancel)
        .await;
    guard.disarm();

    response.into_response()
}

async fn analyze_async(
    State(state): State<ApiState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse>)> {
    let (stored, query, priority) = read_form(multipart).await?.accept(&state.runner).await?;
    let priority = priority
        .as_deref()
        .map(JobPriority::parse)
        .unwrap_or_default();

    let job_id = state.runner.submit(stored, query, priority).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(serde_json::json!({
            "job_id": job_id,
            "status": "queued",
            "priority": priority,
        }))),
    ))
}

async fn analyze_sample(
    State(state): State<ApiState>,
    Query(params): Query<SampleParams>,
) -> Response {
    let stored = match state.runner.documents().load_sample().await {
        Ok(stored) => stored,
        Err(e) => return e.into_response(),
    };

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let response = state
        .runner
        .run_sync(stored, params.query.as_deref(), cancel)
        .await;
    guard.disarm();

    response.into_response()
}

/// =============================
/// Job Endpoints
/// =============================

async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ApiResponse>> {
    let job = state.runner.poll(job_id).await?;
    Ok(Json(ApiResponse::success(job)))
}

async fn cancel_job(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ApiResponse>> {
    let job = state.runner.cancel(job_id).await?;
    Ok(Json(ApiResponse::success(job)))
}

async fn queue_stats(State(state): State<ApiState>) -> Result<Json<ApiResponse>> {
    let stats = state.runner.queue_stats().await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// =============================
/// History Endpoints
/// =============================

async fn list_analyses(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0);

    let analyses = state.analyses.list(limit, offset).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "analyses": analyses,
        "limit": limit,
        "offset": offset,
    }))))
}

async fn get_analysis(
    State(state): State<ApiState>,
    Path(record_id): Path<Uuid>,
) -> Result<Json<ApiResponse>> {
    let record = state
        .analyses
        .get(record_id)
        .await?
        .ok_or(AnalysisError::RecordNotFound(record_id))?;
    Ok(Json(ApiResponse::success(record)))
}

async fn system_stats(State(state): State<ApiState>) -> Result<Json<ApiResponse>> {
    let stats = state.analyses.stats().await?;
    Ok(Json(ApiResponse::success(stats)))
}

async fn cleanup_analyses(
    State(state): State<ApiState>,
    Query(params): Query<CleanupParams>,
) -> Result<Json<ApiResponse>> {
    let days_old = params.days_old.unwrap_or(DEFAULT_CLEANUP_DAYS);
    if !(1..=MAX_CLEANUP_DAYS).contains(&days_old) {
        return Err(AnalysisError::Validation(format!(
            "days_old must be between 1 and {}, got {}",
            MAX_CLEANUP_DAYS, days_old
        )));
    }
    let deleted = state.analyses.delete_older_than(days_old).await?;
    if deleted > 0 {
        warn!(deleted, days_old, "Deleted old analysis records");
    }
    Ok(Json(ApiResponse::success(serde_json::json!({
        "deleted": deleted,
        "days_old": days_old,
    }))))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    let body_limit =
        state.runner.documents().config().max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/analyze-async", post(analyze_async))
        .route("/analyze-sample", post(analyze_sample))
        .route("/jobs/:id", get(get_job).delete(cancel_job))
        .route("/queue-stats", get(queue_stats))
        .route("/analyses", get(list_analyses))
        .route("/analyses/cleanup", post(cleanup_analyses))
        .route("/analyses/:id", get(get_analysis))
        .route("/system-stats", get(system_stats))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::tests::runner;
    use crate::steps::tests::FINANCIAL_TEXT;
    use crate::store::InMemoryAnalysisStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "analysis-boundary";

    fn app(dir: &std::path::Path, extract_text: &str) -> Router {
        let analyses: Arc<dyn AnalysisStore> = Arc::new(InMemoryAnalysisStore::new());
        let runner =
            runner(dir, extract_text, Duration::ZERO).with_analysis_store(analyses.clone());
        create_router(ApiState { runner, analyses })
    }

    fn upload_request(uri: &str, filename: &str, extra: &[(&str, &str)]) -> Request<Body> {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
             Content-Type: application/pdf\r\n\r\n%PDF-1.4 acme\r\n",
            b = BOUNDARY,
            f = filename
        );
        for (name, value) in extra {
            body.push_str(&format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"{n}\"\r\n\r\n{v}\r\n",
                b = BOUNDARY,
                n = name,
                v = value
            ));
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_lists_tools() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), FINANCIAL_TEXT);

        let (status, body) = send(&app, empty_request("GET", "/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["tools"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_analyze_returns_report_and_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), FINANCIAL_TEXT);

        let (status, body) = send(
            &app,
            upload_request("/analyze", "acme.pdf", &[("query", "What are the key risks?")]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["report"]["query"], "What are the key risks?");
        assert_eq!(body["report"]["sections"].as_array().unwrap().len(), 4);

        let (status, body) = send(&app, empty_request("GET", "/analyses")).await;
        assert_eq!(status, StatusCode::OK);
        let analyses = body["data"]["analyses"].as_array().unwrap();
        assert_eq!(analyses.len(), 1);

        let record_id = analyses[0]["record_id"].as_str().unwrap().to_string();
        let (status, body) =
            send(&app, empty_request("GET", &format!("/analyses/{}", record_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["filename"], "acme.pdf");

        let (_, body) = send(&app, empty_request("GET", "/system-stats")).await;
        assert_eq!(body["data"]["total_analyses"], 1);
    }

    #[tokio::test]
    async fn test_analyze_rejects_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), FINANCIAL_TEXT);

        let (status, body) = send(&app, upload_request("/analyze", "notes.txt", &[])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation_error");

        let (_, body) = send(&app, empty_request("GET", "/system-stats")).await;
        assert_eq!(body["data"]["total_analyses"], 0);
    }

    #[tokio::test]
    async fn test_analyze_unreadable_document_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), "blank");

        let (status, body) = send(&app, upload_request("/analyze", "acme.pdf", &[])).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["kind"], "verification_failed");
    }

    #[tokio::test]
    async fn test_async_job_lifecycle_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), FINANCIAL_TEXT);

        let (status, body) = send(
            &app,
            upload_request("/analyze-async", "acme.pdf", &[("priority", "high")]),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["priority"], "high");
        let job_id = body["data"]["job_id"].as_str().unwrap().to_string();
        let job_uri = format!("/jobs/{}", job_id);

        let (status, body) = send(&app, empty_request("GET", &job_uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"], "queued");

        let (_, body) = send(&app, empty_request("GET", "/queue-stats")).await;
        assert_eq!(body["data"]["queued"]["high"], 1);

        let (status, body) = send(&app, empty_request("DELETE", &job_uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"], "failed");
        assert_eq!(body["data"]["error"]["kind"], "cancelled");

        let (status, _) = send(&app, empty_request("DELETE", &job_uri)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), FINANCIAL_TEXT);

        let (status, body) =
            send(&app, empty_request("GET", &format!("/jobs/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");

        let (status, _) = send(
            &app,
            empty_request("GET", &format!("/analyses/{}", Uuid::new_v4())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_sample_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), FINANCIAL_TEXT);

        let (status, body) = send(&app, empty_request("POST", "/analyze-sample")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation_error");
    }

    #[tokio::test]
    async fn test_cleanup_reports_deleted_count() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), FINANCIAL_TEXT);
        send(&app, upload_request("/analyze", "acme.pdf", &[])).await;

        let (status, body) =
            send(&app, empty_request("POST", "/analyses/cleanup?days_old=7")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["deleted"], 0);
        assert_eq!(body["data"]["days_old"], 7);
    }

    #[tokio::test]
    async fn test_cleanup_rejects_out_of_range_age() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), FINANCIAL_TEXT);
        send(&app, upload_request("/analyze", "acme.pdf", &[])).await;

        for days in ["0", "36501", "4294967295"] {
            let uri = format!("/analyses/cleanup?days_old={}", days);
            let (status, body) = send(&app, empty_request("POST", &uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "days_old={}", days);
            assert_eq!(body["error"]["kind"], "validation_error");
        }

        let (_, body) = send(&app, empty_request("GET", "/system-stats")).await;
        assert_eq!(body["data"]["total_analyses"], 1);
    }
}
