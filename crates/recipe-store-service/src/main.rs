use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use recipe_store_api::{
    ApiError, IdResponse, ListQuery, RecipeApi, RecordListResponse, TotalResponse,
    UpsertRecordRequest, API_CONTRACT_VERSION, DEFAULT_PAGE_LIMIT,
};
use recipe_store_core::{
    spawn_dump_on_shutdown, Record, RecordStore, ShutdownSignal, StoreError, DEFAULT_DUMP_FILE,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone)]
struct ServiceState {
    api: RecipeApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "recipe-store-service")]
#[command(about = "HTTP service for the in-memory recipe store")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
    #[arg(long, default_value = DEFAULT_DUMP_FILE)]
    dump: PathBuf,
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    max_page_limit: usize,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        let status = match &err {
            ApiError::Store(
                StoreError::NotFound(_)
                | StoreError::EmptyStore
                | StoreError::PageOutOfRange { .. },
            ) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::InvalidLimit)
            | ApiError::UnsupportedSortKey(_)
            | ApiError::MissingPrincipal => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn principal(headers: &HeaderMap) -> Result<String, ServiceError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::bad_request("X-User-ID is required in headers"))
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/records", get(records_list).post(records_upsert))
        .route("/v1/records/count", get(records_count))
        .route("/v1/records/:id", get(records_get).delete(records_delete))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let store = Arc::new(
        RecordStore::open(&args.dump)
            .with_context(|| format!("failed to restore records from {}", args.dump.display()))?,
    );
    tracing::info!("loaded {} records from {}", store.len(), args.dump.display());

    let shutdown = ShutdownSignal::new();
    let dump_task = spawn_dump_on_shutdown(Arc::clone(&store), args.dump.clone(), shutdown.clone());

    let state = ServiceState { api: RecipeApi::new(store, args.max_page_limit) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!("recipe store listening on {}", args.bind);

    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_requested(shutdown.clone()))
        .await;

    // Dump even when the server stopped on an error.
    shutdown.cancel();
    if let Err(err) = dump_task.await {
        tracing::error!("dump task did not complete: {err}");
    }
    tracing::info!("recipe store stopped");
    served.context("server terminated abnormally")
}

async fn shutdown_requested(shutdown: ShutdownSignal) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!("failed to listen for ctrl-c: {err}");
                shutdown.cancelled().await;
                return;
            }
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
        () = shutdown.cancelled() => {}
    }
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn records_list(
    State(state): State<ServiceState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ServiceEnvelope<RecordListResponse>>, ServiceError> {
    let Query(query) = query.map_err(|err| ServiceError::bad_request(err.body_text()))?;
    let page = state.api.list(&query)?;
    Ok(Json(envelope(page)))
}

async fn records_count(State(state): State<ServiceState>) -> Json<ServiceEnvelope<TotalResponse>> {
    Json(envelope(state.api.count()))
}

async fn records_get(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceEnvelope<Record>>, ServiceError> {
    let record = state.api.get(&id)?;
    Ok(Json(envelope(record)))
}

async fn records_upsert(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    request: Result<Json<UpsertRecordRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<IdResponse>>, ServiceError> {
    let author_id = principal(&headers)?;
    let Json(request) = request.map_err(|err| ServiceError::bad_request(err.body_text()))?;
    let record = state.api.upsert(request, &author_id)?;
    tracing::debug!("upserted record {} for {author_id}", record.id);
    Ok(Json(envelope(IdResponse { id: record.id })))
}

async fn records_delete(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ServiceEnvelope<IdResponse>>, ServiceError> {
    let author_id = principal(&headers)?;
    let deleted = state.api.delete(&id)?;
    tracing::debug!("deleted record {id} for {author_id}");
    Ok(Json(envelope(deleted)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use http::Request;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let store = Arc::new(RecordStore::new());
        app(ServiceState { api: RecipeApi::new(store, DEFAULT_PAGE_LIMIT) })
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn send(router: &Router, request: Request<axum::body::Body>) -> Response {
        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    fn get_request(uri: &str) -> Request<axum::body::Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(axum::body::Body::empty())
            .unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    fn post_request(payload: &serde_json::Value, user: Option<&str>) -> Request<axum::body::Body> {
        let mut builder = Request::builder()
            .uri("/v1/records")
            .method("POST")
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("X-User-ID", user);
        }
        builder
            .body(axum::body::Body::from(payload.to_string()))
            .unwrap_or_else(|err| panic!("failed to build post request: {err}"))
    }

    async fn create(router: &Router, name: &str) -> String {
        let payload = serde_json::json!({
            "name": name,
            "ingredients": [{"amount": 2, "type": "flour"}],
            "temperature": 200
        });
        let response = send(router, post_request(&payload, Some("chef"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        value
            .pointer("/data/id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_else(|| panic!("missing data.id in response: {value}"))
            .to_string()
    }

    fn listed_names(value: &serde_json::Value) -> Vec<String> {
        value
            .pointer("/data/recipes")
            .and_then(serde_json::Value::as_array)
            .unwrap_or_else(|| panic!("missing data.recipes in response: {value}"))
            .iter()
            .filter_map(|record| record.get("name").and_then(serde_json::Value::as_str))
            .map(str::to_string)
            .collect()
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = test_router();
        let response = send(&router, get_request("/v1/health")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(value.pointer("/data/status").and_then(serde_json::Value::as_str), Some("ok"));
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn create_then_get_stamps_author_from_header() {
        let router = test_router();
        let payload = serde_json::json!({
            "id": "fixed-id",
            "user_id": "spoofed",
            "name": "Bread",
            "ingredients": [{"amount": 500, "type": "flour"}, {"amount": 500, "type": "flour"}],
            "temperature": 220
        });
        let response = send(&router, post_request(&payload, Some("alice"))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&router, get_request("/v1/records/fixed-id")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(
            value.pointer("/data/user_id").and_then(serde_json::Value::as_str),
            Some("alice")
        );
        assert_eq!(
            value.pointer("/data/ingredients").and_then(serde_json::Value::as_array).map(Vec::len),
            Some(2)
        );
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn create_requires_user_header() {
        let router = test_router();
        let payload = serde_json::json!({"name": "Soup", "ingredients": [], "temperature": 90});
        let response = send(&router, post_request(&payload, None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = response_json(response).await;
        assert!(value.get("error").and_then(serde_json::Value::as_str).is_some());
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn listing_paginates_sorted_by_name() {
        let router = test_router();
        for name in ["B", "A", "C"] {
            create(&router, name).await;
        }

        let first = send(&router, get_request("/v1/records?page=1&limit=2&sort_by=name")).await;
        assert_eq!(first.status(), StatusCode::OK);
        let first = response_json(first).await;
        assert_eq!(listed_names(&first), ["A", "B"]);
        assert_eq!(first.pointer("/data/total").and_then(serde_json::Value::as_u64), Some(3));

        let second = send(&router, get_request("/v1/records?page=2&limit=2")).await;
        assert_eq!(listed_names(&response_json(second).await), ["C"]);

        let third = send(&router, get_request("/v1/records?page=3&limit=2")).await;
        assert_eq!(third.status(), StatusCode::NOT_FOUND);

        let count = response_json(send(&router, get_request("/v1/records/count")).await).await;
        assert_eq!(count.pointer("/data/total").and_then(serde_json::Value::as_u64), Some(3));
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn listing_rejects_bad_queries_and_reports_empty_store() {
        let router = test_router();
        let empty = send(&router, get_request("/v1/records")).await;
        assert_eq!(empty.status(), StatusCode::NOT_FOUND);

        create(&router, "A").await;
        let bad_sort = send(&router, get_request("/v1/records?sort_by=temperature")).await;
        assert_eq!(bad_sort.status(), StatusCode::BAD_REQUEST);

        let bad_page = send(&router, get_request("/v1/records?page=abc")).await;
        assert_eq!(bad_page.status(), StatusCode::BAD_REQUEST);
    }

    // Test IDs: TSVC-006
    #[tokio::test]
    async fn delete_removes_record_once() {
        let router = test_router();
        let id = create(&router, "Tea").await;

        let delete = |user: Option<&'static str>| {
            let mut builder = Request::builder().uri(format!("/v1/records/{id}")).method("DELETE");
            if let Some(user) = user {
                builder = builder.header("X-User-ID", user);
            }
            builder
                .body(axum::body::Body::empty())
                .unwrap_or_else(|err| panic!("failed to build delete request: {err}"))
        };

        assert_eq!(send(&router, delete(None)).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(send(&router, delete(Some("chef"))).await.status(), StatusCode::OK);
        assert_eq!(send(&router, delete(Some("chef"))).await.status(), StatusCode::NOT_FOUND);

        let missing = send(&router, get_request(&format!("/v1/records/{id}"))).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    // Test IDs: TSVC-007
    #[tokio::test]
    async fn zero_limit_falls_back_to_default_page_size() {
        let router = test_router();
        for name in ["B", "A", "C"] {
            create(&router, name).await;
        }

        let response = send(&router, get_request("/v1/records?page=1&limit=0")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(listed_names(&response_json(response).await), ["A", "B"]);

        let clamped = send(&router, get_request("/v1/records?page=1&limit=50")).await;
        assert_eq!(listed_names(&response_json(clamped).await).len(), DEFAULT_PAGE_LIMIT);
    }
}
