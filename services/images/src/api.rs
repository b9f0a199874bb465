use crate::config::ApiConfig;
use crate::error::ImageError;
use crate::orchestrator::ImageService;
use crate::router::{
    self, image_id_from_path, Operation, RequestEvent, ResponseEvent, IMAGE_ID_PARAM,
};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{QueryRejection, StringRejection},
        DefaultBodyLimit, Query, State,
    },
    http::{HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub images: ImageService,
}

impl IntoResponse for ResponseEvent {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, self.body).into_response();

        for (name, value) in self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => warn!(header = %name, "Dropping invalid response header"),
            }
        }

        response
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Image routes are resolved by the event router, which also owns the
        // invalid request response
        .fallback(handle_image_request)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "image-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.images.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "metadata_store": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "metadata_store": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Translate an HTTP request into a request event and dispatch it.
///
/// On a routable request, bodies that are not UTF-8 or exceed the configured
/// limit are answered with the same JSON error shape as any other failed
/// image request. Unroutable requests are left to the event router.
async fn handle_image_request(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    body: Result<String, StringRejection>,
) -> ResponseEvent {
    let path = uri.path();
    let routable = Operation::route(method.as_str(), path).is_some();

    let query = match query {
        Ok(Query(query)) => query,
        Err(_) if !routable => HashMap::new(),
        Err(rejection) => {
            warn!(resource = %path, error = %rejection.body_text(), "Rejected query string");
            return ResponseEvent::from_error(&ImageError::validation(format!(
                "invalid query string: {}",
                rejection.body_text()
            )));
        }
    };

    let body = match body {
        Ok(body) => body,
        Err(_) if !routable => String::new(),
        Err(rejection) => {
            warn!(resource = %path, error = %rejection.body_text(), "Rejected request body");
            return ResponseEvent::from_error(&ImageError::validation(format!(
                "invalid request body: {}",
                rejection.body_text()
            )));
        }
    };

    let path_parameters = image_id_from_path(path)
        .map(|id| HashMap::from([(IMAGE_ID_PARAM.to_string(), id.to_string())]));

    let event = RequestEvent {
        http_method: method.as_str().to_string(),
        resource: path.to_string(),
        query_string_parameters: Some(query),
        path_parameters,
        body: (!body.is_empty()).then_some(body),
    };

    router::dispatch(&state.images, event).await
}

/// Start the image API server, stopping when `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting image API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::{InMemoryBlobStore, InMemoryMetadataStore};
    use crate::metadata_store::MockMetadataStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let images = ImageService::with_defaults(
            Arc::new(InMemoryBlobStore::default()),
            Arc::new(InMemoryMetadataStore::new()),
        );
        create_router(AppState { images }, &ApiConfig::default())
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_readiness_reports_store_fault() {
        let mut metadata = MockMetadataStore::new();
        metadata
            .expect_health_check()
            .returning(|| Err(StoreError::metadata("health_check", "connection refused")));

        let images = ImageService::with_defaults(
            Arc::new(InMemoryBlobStore::default()),
            Arc::new(metadata),
        );
        let app = create_router(AppState { images }, &ApiConfig::default());

        let (status, body) = send(&app, get("/ready")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
    }

    #[tokio::test]
    async fn test_http_lifecycle() {
        let app = app();

        let upload = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "image_data": STANDARD.encode(b"0123456789"),
                    "metadata": {"tag": "cat"}
                })
                .to_string(),
            ))
            .unwrap();
        let (status, body) = send(&app, upload).await;
        assert_eq!(status, StatusCode::OK);
        let id = body["image_id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, get("/images?tag=cat")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["images"][0]["image_id"], id.as_str());

        let (_, body) = send(&app, get("/images?tag=dog")).await;
        assert_eq!(body["images"], json!([]));

        let (status, body) = send(&app, get(&format!("/image/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["image_url"].as_str().unwrap().contains(&id));

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/image/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, delete).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, get("/images")).await;
        assert_eq!(body["images"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_route_is_invalid_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/invalid")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["content-type"], "application/json");
    }

    #[tokio::test]
    async fn test_non_utf8_body_gets_json_error() {
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from(vec![0xff, 0xfe, 0x00]))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["content-type"], "application/json");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid request body"));
    }

    #[tokio::test]
    async fn test_oversized_body_gets_json_error() {
        let images = ImageService::with_defaults(
            Arc::new(InMemoryBlobStore::default()),
            Arc::new(InMemoryMetadataStore::new()),
        );
        let config = ApiConfig {
            max_body_bytes: 64,
            ..Default::default()
        };
        let app = create_router(AppState { images }, &config);

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "image_data": STANDARD.encode([7u8; 150]) }).to_string(),
            ))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["content-type"], "application/json");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].is_string());

        // The rejected upload never reached the stores
        let (_, body) = send(&app, get("/images")).await;
        assert_eq!(body["images"], json!([]));

        // An unroutable request stays a routing fault whatever its body
        let request = Request::builder()
            .method("POST")
            .uri("/invalid")
            .body(Body::from(vec![b'x'; 200]))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request");
    }
}
