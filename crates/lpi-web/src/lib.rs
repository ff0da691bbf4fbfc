//! JSON boundary over the ingestion pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lpi_ingest::{IngestError, IngestPipeline};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "lpi-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
}

impl AppState {
    pub fn new(pipeline: IngestPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestRequest {
    #[serde(default)]
    subject_url: String,
    use_cache: Option<bool>,
    use_fixtures: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest {
    #[serde(default)]
    subject_urls: Vec<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/profiles/ingest", post(ingest_handler))
        .route("/api/profiles/ingest-batch", post(ingest_batch_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(port: u16, state: AppState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> Response {
    let mut options = state.pipeline.default_options();
    if let Some(use_cache) = request.use_cache {
        options.use_cache = use_cache;
    }
    if let Some(use_fixtures) = request.use_fixtures {
        options.use_fixtures = use_fixtures;
    }

    match state.pipeline.ingest_one(&request.subject_url, options).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => ingest_error(err),
    }
}

async fn ingest_batch_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchRequest>,
) -> Response {
    match state.pipeline.ingest_many(&request.subject_urls).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => ingest_error(err),
    }
}

fn status_for(err: &IngestError) -> StatusCode {
    match err {
        IngestError::EmptyBatch | IngestError::EmptySubject => StatusCode::BAD_REQUEST,
        IngestError::Fetch(_) => StatusCode::BAD_GATEWAY,
        IngestError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        IngestError::Cache(_) | IngestError::Skills(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ingest_error(err: IngestError) -> Response {
    let status = status_for(&err);
    warn!(status = status.as_u16(), error = %err, "ingestion request failed");
    (
        status,
        Json(json!({ "success": false, "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use lpi_core::ExternalProfile;
    use lpi_ingest::InMemorySkillRepository;
    use lpi_storage::{CacheConfig, FetchError, ProfileCache, ProfileSource};
    use serde_json::Value;
    use tower::ServiceExt;

    const KNOWN: &str = "https://www.linkedin.com/in/known";

    struct OneProfile;

    #[async_trait]
    impl ProfileSource for OneProfile {
        async fn fetch_profile(&self, subject_url: &str) -> Result<ExternalProfile, FetchError> {
            if subject_url == KNOWN {
                Ok(ExternalProfile {
                    first_name: Some("Known".into()),
                    last_name: Some("Person".into()),
                    ..Default::default()
                })
            } else {
                Err(FetchError::NotFound {
                    url: subject_url.to_string(),
                })
            }
        }
    }

    fn test_app(dir: &tempfile::TempDir) -> Router {
        let cache = ProfileCache::new(CacheConfig {
            root: dir.path().to_path_buf(),
            expiration_days: 7,
        });
        let pipeline = IngestPipeline::new(
            cache,
            Arc::new(OneProfile),
            Arc::new(InMemorySkillRepository::new()),
        );
        app(AppState::new(pipeline))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let resp = test_app(&dir)
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn ingest_returns_document_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let resp = test_app(&dir)
            .oneshot(post_json("/api/profiles/ingest", json!({ "subjectUrl": KNOWN })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["source"], "api");
        assert_eq!(body["profile"]["firstName"], "Known");
        assert_eq!(body["validation"]["isValid"], true);
        assert_eq!(body["metadata"]["subjectUrl"], KNOWN);
    }

    #[tokio::test]
    async fn ingest_maps_errors_to_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir);

        let missing = app
            .clone()
            .oneshot(post_json(
                "/api/profiles/ingest",
                json!({ "subjectUrl": "https://www.linkedin.com/in/nobody" }),
            ))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(missing).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let empty = app
            .oneshot(post_json("/api/profiles/ingest", json!({ "subjectUrl": "" })))
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_reports_partitioned_summary() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir);

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/profiles/ingest-batch",
                json!({ "subjectUrls": [KNOWN, "https://www.linkedin.com/in/nobody"] }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["summary"], json!({ "total": 2, "successful": 1, "failed": 1 }));
        assert_eq!(body["failed"][0]["subjectUrl"], "https://www.linkedin.com/in/nobody");

        let empty = app
            .oneshot(post_json("/api/profiles/ingest-batch", json!({ "subjectUrls": [] })))
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }
}
