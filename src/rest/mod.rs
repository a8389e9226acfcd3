//! REST surface, `/v1`-prefixed. Grounded on the teacher's
//! `mcp::http::HttpMcpServer` for the axum scaffolding (CORS layer, bearer
//! auth, origin check, port-bind error messages) with the MCP/JSON-RPC
//! routing replaced by the REST routes described in
//! `examples/original_source/src/raggify/server/fastapi.py` --
//! `/health`, `/reload`, `/upload`, `/ingest/*`, `/job`, `/query/*`.

use crate::config::Config;
use crate::retrieve;
use crate::store::ScoredNode;
use crate::worker::{JobKind, JobStatus, Worker};
use axum::{
    extract::{Multipart, Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tower::ServiceBuilder;
use tower_http::cors::{Any, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    worker: Arc<Worker>,
    api_key: String,
    allowed_origins: Vec<String>,
    authless: bool,
    /// Serializes handlers that mutate shared stores (ingest, query,
    /// reload, upload); `/health` and friends bypass it entirely.
    request_lock: Arc<AsyncMutex<()>>,
}

/// Builds the `/v1`-prefixed router. `worker` is shared with whatever owns
/// the process's background job queue so job ids stay consistent between
/// `/ingest/*` and `/job`.
pub fn build_router(worker: Arc<Worker>, config: &Config) -> Router {
    let api_key = if config.http_server.authless {
        String::new()
    } else {
        std::env::var(&config.http_server.api_key_env).unwrap_or_default()
    };

    let state = AppState {
        worker,
        api_key,
        allowed_origins: config.http_server.allowed_origins.clone(),
        authless: config.http_server.authless,
        request_lock: Arc::new(AsyncMutex::new(())),
    };

    let cors = if state.allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> =
            state.allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let v1 = Router::new()
        .route("/health", get(handle_health))
        .route("/reload", get(handle_reload))
        .route("/upload", post(handle_upload))
        .route("/ingest/:kind", post(handle_ingest))
        .route("/job", post(handle_job))
        .route("/query/:kind", post(handle_query));

    Router::new()
        .nest("/v1", v1)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    if state.authless {
        return Ok(());
    }
    let provided = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));
    match provided {
        Some(key) if key == state.api_key => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "missing or invalid Authorization header"})),
        )
            .into_response()),
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

async fn handle_health(State(_state): State<AppState>) -> Response {
    match crate::runtime::get().await {
        Ok(rt) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "vector_store": true,
                "document_store": true,
                "embed": rt.embed.container(crate::model::Modality::Text).is_some(),
                "rerank": rt.rerank.is_some(),
                "ingest_cache": true,
            })),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn handle_reload(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let _guard = state.request_lock.lock().await;
    match crate::runtime::build().await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({"status": "reloaded"}))).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Serialize)]
struct UploadedFile {
    filename: String,
    content_type: String,
    save_path: String,
}

async fn handle_upload(State(state): State<AppState>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let _guard = state.request_lock.lock().await;

    let rt = match crate::runtime::get().await {
        Ok(rt) => rt,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let mut saved = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        };

        let Some(filename) = field.file_name().map(str::to_string) else {
            return error_response(StatusCode::BAD_REQUEST, "multipart field is missing a filename");
        };
        let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        };

        let save_path = rt.config.ingest.upload_dir.join(&filename);
        if let Err(e) = std::fs::create_dir_all(&rt.config.ingest.upload_dir) {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
        if let Err(e) = std::fs::write(&save_path, &bytes) {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }

        saved.push(UploadedFile {
            filename,
            content_type,
            save_path: save_path.display().to_string(),
        });
    }

    (StatusCode::OK, Json(serde_json::json!({"files": saved}))).into_response()
}

#[derive(Deserialize)]
struct IngestRequest {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(kind): AxumPath<String>,
    Json(body): Json<IngestRequest>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let _guard = state.request_lock.lock().await;

    let rt = match crate::runtime::get().await {
        Ok(rt) => rt,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let source = body.path.or(body.url);
    let Some(source) = source else {
        return error_response(StatusCode::BAD_REQUEST, "request body must set 'path' or 'url'");
    };

    let job_kind = match kind.as_str() {
        "path" => JobKind::IngestPath(source),
        "path_list" => JobKind::IngestPathList(source),
        "url" => JobKind::IngestUrl(source),
        "url_list" => JobKind::IngestUrlList(source),
        other => return error_response(StatusCode::BAD_REQUEST, format!("unknown ingest kind: {other}")),
    };

    let job = state.worker.submit(job_kind, rt.config.clone());
    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "accepted", "job_id": job.id.to_string()})),
    )
        .into_response()
}

#[derive(Deserialize)]
struct JobRequest {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    rm: bool,
}

fn job_status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "PENDING",
        JobStatus::Running => "RUNNING",
        JobStatus::Succeeded => "SUCCEEDED",
        JobStatus::Failed => "FAILED",
        JobStatus::Canceled => "CANCELED",
    }
}

async fn handle_job(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<JobRequest>) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }

    match body.job_id {
        None => {
            let jobs = state.worker.list_jobs();
            let mut summary: HashMap<String, &'static str> = HashMap::new();
            for job in &jobs {
                summary.insert(job.id.to_string(), job_status_label(job.status));
            }
            if body.rm {
                state.worker.prune_completed();
            }
            (StatusCode::OK, Json(serde_json::json!(summary))).into_response()
        }
        Some(job_id) => {
            let Ok(id) = job_id.parse::<u64>() else {
                return error_response(StatusCode::BAD_REQUEST, format!("unknown job id: {job_id}"));
            };
            let Some(job) = state.worker.get_job(id) else {
                return error_response(StatusCode::BAD_REQUEST, format!("unknown job id: {job_id}"));
            };
            if body.rm {
                state.worker.remove_job(id);
            }
            (StatusCode::OK, Json(serde_json::json!(job))).into_response()
        }
    }
}

#[derive(Deserialize)]
struct TextQueryRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default = "default_topk")]
    topk: usize,
    #[serde(default)]
    mode: Option<String>,
}

fn default_topk() -> usize {
    10
}

#[derive(Serialize)]
struct DocumentResponse {
    text: Option<String>,
    metadata: crate::model::BasicMetaData,
    score: f32,
}

fn to_documents(nodes: Vec<ScoredNode>) -> Vec<DocumentResponse> {
    nodes
        .into_iter()
        .map(|n| DocumentResponse { text: n.text, metadata: n.metadata, score: n.score })
        .collect()
}

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(kind): AxumPath<String>,
    Json(body): Json<TextQueryRequest>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let _guard = state.request_lock.lock().await;

    let rt = match crate::runtime::get().await {
        Ok(rt) => rt,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let topk = body.topk;
    let result = match kind.as_str() {
        "text_text" => {
            let Some(query) = &body.query else {
                return error_response(StatusCode::BAD_REQUEST, "'query' is required for text_text");
            };
            let cfg = match &body.mode {
                Some(mode) => {
                    let mut cfg = (*rt.config).clone();
                    cfg.retrieve.mode = mode.clone();
                    cfg
                }
                None => (*rt.config).clone(),
            };
            retrieve::text::retrieve(&rt.db, &rt.embed, &cfg, query, topk)
                .await
                .map(|hits| (hits, Some(query.clone())))
        }
        "text_image" => with_text_query(&body, |q| retrieve::media::text_to_image(&rt.db, &rt.embed, q, topk)).await,
        "text_audio" => with_text_query(&body, |q| retrieve::media::text_to_audio(&rt.db, &rt.embed, q, topk)).await,
        "text_video" => with_text_query(&body, |q| retrieve::media::text_to_video(&rt.db, &rt.embed, q, topk)).await,
        "image_image" => with_file_query(&body, |p| retrieve::media::image_to_image(&rt.db, &rt.embed, p, topk)).await,
        "audio_audio" => with_file_query(&body, |p| retrieve::media::audio_to_audio(&rt.db, &rt.embed, p, topk)).await,
        "image_video" => with_file_query(&body, |p| retrieve::media::image_to_video(&rt.db, &rt.embed, p, topk)).await,
        "audio_video" => with_file_query(&body, |p| retrieve::media::audio_to_video(&rt.db, &rt.embed, p, topk)).await,
        "video_video" => with_file_query(&body, |p| retrieve::media::video_to_video(&rt.db, &rt.embed, p, topk)).await,
        other => return error_response(StatusCode::BAD_REQUEST, format!("unknown query kind: {other}")),
    };

    match result {
        Ok((hits, rerank_query)) => {
            let reranked = match (&rt.rerank, &rerank_query) {
                (Some(r), Some(q)) => r.rerank(hits, q, topk).await,
                _ => Ok(hits),
            };
            match reranked {
                Ok(hits) => (StatusCode::OK, Json(serde_json::json!({"documents": to_documents(hits)}))).into_response(),
                Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
        Err(e) => query_error_response(e),
    }
}

fn query_error_response(e: crate::error::RagError) -> Response {
    use crate::error::RagError;
    match &e {
        RagError::UnsupportedCrossModal(_) | RagError::UnsupportedProvider(_) | RagError::InvalidInput(_) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn with_text_query<'a, F, Fut>(
    body: &'a TextQueryRequest,
    run: F,
) -> Result<(Vec<ScoredNode>, Option<String>), crate::error::RagError>
where
    F: FnOnce(&'a str) -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<Vec<ScoredNode>>>,
{
    let Some(query) = &body.query else {
        return Err(crate::error::RagError::InvalidInput("'query' is required for this query kind".into()));
    };
    let hits = run(query).await?;
    Ok((hits, Some(query.clone())))
}

async fn with_file_query<'a, F, Fut>(
    body: &'a TextQueryRequest,
    run: F,
) -> Result<(Vec<ScoredNode>, Option<String>), crate::error::RagError>
where
    F: FnOnce(&'a std::path::Path) -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<Vec<ScoredNode>>>,
{
    let Some(path) = &body.path else {
        return Err(crate::error::RagError::InvalidInput("'path' is required for this query kind".into()));
    };
    let hits = run(std::path::Path::new(path)).await?;
    Ok((hits, None))
}
