mod analysis;
mod http;
mod idempotency;
mod images;
mod jobs;
mod llm;
mod metrics;
mod models;
mod naver;
mod pipeline;
mod security;
mod spaces;
mod storage;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use eyre::WrapErr;
use idempotency::IdempotencyCache;
use jobs::{JobQueue, RetryPolicies, Worker};
use llm::{LlmConfig, OpenAiClient};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AnalysisRequest, AnalysisResult, ApiError, BulkImageUpdate, Channel, ImageGroup, ResultItem,
    ResultItemDetail, SearchCreated, SearchRequest,
};
use naver::{CookieExtractor, NaverClient};
use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineErrorKind, storage_error};
use security::{AuthContext, AuthState, require_api_auth};
use serde::Serialize;
use serde_json::json;
use spaces::{ObjectStore, SpacesClient};
use std::{net::SocketAddr, sync::Arc};
use storage::Store;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "scout.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let db_path = std::env::var("DATABASE_PATH")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "scout.db".into());
    let store = Store::open(&db_path).wrap_err_with(|| format!("opening database {db_path}"))?;

    let naver = NaverClient::from_env();
    let config = PipelineConfig {
        num_results: naver.config().num_results,
    };
    let objects = SpacesClient::from_env().map(|client| Arc::new(client) as Arc<dyn ObjectStore>);
    if objects.is_none() {
        warn!(target = "scout.spaces", "object storage not configured; detail images will be skipped");
    }
    let pipeline = Pipeline::new(
        config,
        store.clone(),
        Arc::new(CookieExtractor::from_env()),
        Arc::new(naver),
        objects,
    );
    let vision = Arc::new(OpenAiClient::new(LlmConfig::from_env()));
    let (queue, _worker) = JobQueue::spawn(Worker::new(pipeline, vision), RetryPolicies::from_env());

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        store,
        queue,
        idempotency: IdempotencyCache::from_env(),
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
    };
    let app = build_router(state, AuthState::from_env())
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "scout.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    store: Store,
    queue: JobQueue,
    idempotency: IdempotencyCache,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

fn build_router(state: AppState, auth: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/searches", post(create_search))
        .route("/searches/{id}/items", get(list_search_items))
        .route("/result-items/{id}", get(get_result_item))
        .route("/result-items/{id}/image-groups", get(list_image_groups))
        .route("/result-items/{id}/images/bulk-update", post(bulk_update_images))
        .route("/result-items/{id}/analyze", post(start_analysis))
        .route("/jobs/{id}", get(get_job_status))
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(json!({"openapi": "3.0.3"}))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "shopping-scout",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY")
        && header_value(&headers, "X-Docs-Key") != key
    {
        return Err(AppError::rejected(StatusCode::UNAUTHORIZED, "unauthorized", "docs key required"));
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> impl IntoResponse {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Shopping Scout API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    ([("Content-Type", "text/html; charset=utf-8")], html)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY")
        && header_value(&headers, "X-Metrics-Key") != secret
    {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

/// Create a search and queue its scrape.
///
/// - Method: `POST`
/// - Path: `/searches`
/// - Auth: `Authorization: Bearer <key>` or `X-Scout-Key: <key>`
/// - Body: `SearchRequest`
/// - Response: `202` with `SearchCreated`; replays the first response for a repeated
///   `Idempotency-Key`.
async fn create_search(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    Json(payload): Json<SearchRequest>,
) -> Result<(StatusCode, Json<SearchCreated>), AppError> {
    metrics::inc_requests("/searches");

    let keyword = payload.keyword.trim();
    if keyword.is_empty() {
        return Err(AppError::rejected(
            StatusCode::BAD_REQUEST,
            "keyword_required",
            "keyword must not be blank",
        ));
    }
    let channel = match payload.channel.as_deref() {
        None => Channel::Naver,
        Some(raw) => match Channel::from_str(raw) {
            Some(Channel::Naver) => Channel::Naver,
            _ => {
                return Err(AppError::rejected(
                    StatusCode::BAD_REQUEST,
                    "unsupported_channel",
                    format!("channel `{raw}` is not supported"),
                ));
            }
        },
    };

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(key) = &idempotency_key
        && let Some(existing) = state.idempotency.get(&context.user_id, key).await
    {
        info!(target = "scout.api", user_id = %context.user_id, search_id = existing.search_id, "idempotent_replay");
        return Ok((StatusCode::ACCEPTED, Json(existing)));
    }

    let search = state
        .store
        .create_search(&context.user_id, channel, keyword)
        .map_err(storage_error("searches"))?;
    let job_id = state
        .queue
        .enqueue_scrape(search.id)
        .await
        .map_err(AppError::Enqueue)?;
    info!(
        target = "scout.api",
        user_id = %context.user_id,
        api_key = %context.api_key_id,
        search_id = search.id,
        job_id = %job_id,
        "search_created"
    );

    let created = SearchCreated {
        search_id: search.id,
        job_id: job_id.to_string(),
    };
    if let Some(key) = &idempotency_key {
        state.idempotency.put(&context.user_id, key, &created).await;
    }
    Ok((StatusCode::ACCEPTED, Json(created)))
}

/// Result items scraped for one of the caller's searches.
async fn list_search_items(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ResultItem>>, AppError> {
    metrics::inc_requests("/searches/{id}/items");
    let search = state
        .store
        .get_search(id)
        .map_err(storage_error("searches"))?;
    if search.user_id != context.user_id {
        return Err(PipelineError::not_found("searches", "search not found").into());
    }
    let items = state
        .store
        .list_items_for_search(id)
        .map_err(storage_error("searches"))?;
    Ok(Json(items))
}

async fn get_result_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ResultItemDetail>, AppError> {
    metrics::inc_requests("/result-items/{id}");
    let detail = state
        .store
        .result_item_detail(id)
        .map_err(storage_error("result_items"))?;
    Ok(Json(detail))
}

async fn list_image_groups(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ImageGroup>>, AppError> {
    metrics::inc_requests("/result-items/{id}/image-groups");
    state
        .store
        .get_result_item(id)
        .map_err(storage_error("image_groups"))?;
    let groups = state
        .store
        .image_groups(id)
        .map_err(storage_error("image_groups"))?;
    Ok(Json(groups))
}

#[derive(Debug, Serialize)]
struct BulkUpdateResponse {
    updated_count: usize,
}

/// Assign section, category, order and description to detail images.
///
/// Image ids that do not belong to the item are skipped.
async fn bulk_update_images(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<BulkImageUpdate>,
) -> Result<Json<BulkUpdateResponse>, AppError> {
    metrics::inc_requests("/result-items/{id}/images/bulk-update");
    state
        .store
        .get_result_item(id)
        .map_err(storage_error("bulk_update"))?;
    let updated_count = state
        .store
        .bulk_update_images(id, &payload.images)
        .map_err(storage_error("bulk_update"))?;
    info!(target = "scout.api", result_item_id = id, updated_count, "images_updated");
    Ok(Json(BulkUpdateResponse { updated_count }))
}

#[derive(Debug, Serialize)]
struct AnalysisStarted {
    message: String,
    analysis_results: Vec<AnalysisResult>,
    job_id: String,
}

/// Start vision analysis of image groups.
///
/// - Method: `POST`
/// - Path: `/result-items/{id}/analyze`
/// - Body: `AnalysisRequest`
/// - Response: `202` with the pending analysis rows and the job that fills them.
async fn start_analysis(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<AnalysisStarted>), AppError> {
    metrics::inc_requests("/result-items/{id}/analyze");
    let analysis_results = analysis::request_analysis(&state.store, id, &payload)?;
    let job_id = state
        .queue
        .enqueue_analysis(id)
        .await
        .map_err(AppError::Enqueue)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AnalysisStarted {
            message: format!("analysis started for {} group(s)", analysis_results.len()),
            analysis_results,
            job_id: job_id.to_string(),
        }),
    ))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(PipelineError::invalid_input("jobs", "invalid_job_id").into());
    };
    match state.queue.get(uuid).await {
        Some(info) => Ok(Json(info)),
        None => Err(PipelineError::not_found("jobs", "job not found").into()),
    }
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Enqueue(ApiError),
    Rejected {
        status: StatusCode,
        code: &'static str,
        detail: String,
    },
}

impl AppError {
    fn rejected(status: StatusCode, code: &'static str, detail: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            code,
            detail: detail.into(),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::NotFound => StatusCode::NOT_FOUND,
                    PipelineErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    error!(target = "scout.api", error = %err, "request_failed");
                }
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::Enqueue(payload) => {
                error!(target = "scout.api", error = %payload.error, "enqueue_failed");
                (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response()
            }
            AppError::Rejected {
                status,
                code,
                detail,
            } => {
                let payload = ApiError {
                    error: code.to_string(),
                    detail: Some(detail),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobKind, JobRunner};
    use crate::models::{AnalysisStatus, NewResultItem};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    struct EchoRunner;

    #[async_trait]
    impl JobRunner for EchoRunner {
        async fn run(&self, kind: &JobKind) -> Result<Value, PipelineError> {
            Ok(serde_json::to_value(kind).unwrap_or_default())
        }
    }

    fn app() -> (Router, Store) {
        let store = Store::in_memory().unwrap();
        let (queue, _handle) = JobQueue::spawn(EchoRunner, RetryPolicies::default());
        let state = AppState {
            store: store.clone(),
            queue,
            idempotency: IdempotencyCache::new(None, 60),
            openapi: Arc::new(load_openapi()),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        };
        let auth = AuthState::new("alice:k1,bob:k2", 100.0, 100.0);
        (build_router(state, auth), store)
    }

    fn request(method: &str, uri: &str, key: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(security::API_KEY_HEADER, key);
        match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn seed_item(store: &Store, user: &str) -> (i64, i64) {
        let search = store.create_search(user, Channel::Naver, "shoes").unwrap();
        let result = store.create_result(search.id).unwrap();
        let item = store
            .create_result_item(
                result.id,
                &NewResultItem {
                    seller: "store".into(),
                    product: "runner".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        (search.id, item.id)
    }

    #[tokio::test]
    async fn health_needs_no_key() {
        let (router, _) = app();
        let res = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_search_queues_scrape_and_replays_idempotent_requests() {
        let (router, store) = app();
        let make = || {
            let mut req = request("POST", "/searches", "k1", Some(json!({"keyword": " shoes "})));
            req.headers_mut()
                .insert("Idempotency-Key", "abc".parse().unwrap());
            req
        };
        let (status, first) = send(&router, make()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let search_id = first["search_id"].as_i64().unwrap();
        let search = store.get_search(search_id).unwrap();
        assert_eq!(search.keyword, "shoes");
        assert_eq!(search.user_id, "alice");

        let (status, second) = send(&router, make()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(first, second);

        let job_uri = format!("/jobs/{}", first["job_id"].as_str().unwrap());
        let (status, job) = send(&router, request("GET", &job_uri, "k1", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["kind"]["type"], "scrape");
    }

    #[tokio::test]
    async fn create_search_validates_keyword_and_channel() {
        let (router, _) = app();
        let (status, body) = send(
            &router,
            request("POST", "/searches", "k1", Some(json!({"keyword": "   "}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "keyword_required");

        let (status, body) = send(
            &router,
            request(
                "POST",
                "/searches",
                "k1",
                Some(json!({"keyword": "shoes", "channel": "coupang"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported_channel");
    }

    #[tokio::test]
    async fn search_items_are_visible_only_to_their_owner() {
        let (router, store) = app();
        let (search_id, item_id) = seed_item(&store, "alice");
        let uri = format!("/searches/{search_id}/items");

        let (status, body) = send(&router, request("GET", &uri, "k1", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], item_id);

        let (status, _) = send(&router, request("GET", &uri, "k2", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_result_item_is_404() {
        let (router, _) = app();
        let (status, body) = send(&router, request("GET", "/result-items/99", "k1", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "result_items");
    }

    #[tokio::test]
    async fn bulk_update_groups_images_then_analysis_is_queued() {
        let (router, store) = app();
        let (_, item_id) = seed_item(&store, "alice");
        let a = store.add_detail_image(item_id, "https://cdn/a.png", 0).unwrap().unwrap();
        let b = store.add_detail_image(item_id, "https://cdn/b.png", 1).unwrap().unwrap();

        let (status, body) = send(
            &router,
            request(
                "POST",
                &format!("/result-items/{item_id}/images/bulk-update"),
                "k1",
                Some(json!({"images": [
                    {"id": a.id, "section": 1, "category": "specifications"},
                    {"id": b.id, "section": 1, "category": "specifications", "order": 5},
                    {"id": 4242, "section": 2, "category": "specifications"}
                ]})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated_count"], 2);

        let (status, groups) = send(
            &router,
            request("GET", &format!("/result-items/{item_id}/image-groups"), "k1", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let grouped = groups
            .as_array()
            .unwrap()
            .iter()
            .find(|g| g["section"] == 1)
            .unwrap();
        assert_eq!(grouped["image_count"], 2);

        let analyze = format!("/result-items/{item_id}/analyze");
        let (status, body) = send(
            &router,
            request("POST", &analyze, "k1", Some(json!({"sections": []}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "sections_required");

        let (status, body) = send(
            &router,
            request(
                "POST",
                &analyze,
                "k1",
                Some(json!({"sections": [{"section": 1, "category": "specifications"}]})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["analysis_results"].as_array().unwrap().len(), 1);
        assert!(body["job_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn analysis_of_empty_sections_is_accepted_with_no_results() {
        let (router, store) = app();
        let (_, item_id) = seed_item(&store, "alice");

        let (status, body) = send(
            &router,
            request(
                "POST",
                &format!("/result-items/{item_id}/analyze"),
                "k1",
                Some(json!({"sections": [{"section": 3, "category": "warranty"}]})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["message"], "analysis started for 0 group(s)");
        assert!(body["analysis_results"].as_array().unwrap().is_empty());
        assert_eq!(
            store.get_result_item(item_id).unwrap().analysis_status,
            AnalysisStatus::InProgress
        );
    }

    #[tokio::test]
    async fn job_lookup_rejects_bad_and_unknown_ids() {
        let (router, _) = app();
        let (status, _) = send(&router, request("GET", "/jobs/not-a-uuid", "k1", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let unknown = format!("/jobs/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&router, request("GET", &unknown, "k1", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
