//! Read-only Distribution API v2 server over a bundle's registry root.

pub mod ephemeral;
pub mod storage;

pub use ephemeral::{EphemeralRegistry, PendingRegistry, ServiceState, ServingRegistry};
pub use storage::{RegistryStorage, StoredManifest};

use crate::error::SyncError;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const API_VERSION_HEADER: HeaderName = HeaderName::from_static("docker-distribution-api-version");
const CONTENT_DIGEST_HEADER: HeaderName = HeaderName::from_static("docker-content-digest");
const API_VERSION: HeaderValue = HeaderValue::from_static("registry/2.0");

#[derive(Clone)]
struct AppState {
    storage: Arc<RegistryStorage>,
}

/// Routes of the read-only registry.
pub fn router(storage: RegistryStorage) -> Router {
    let state = AppState {
        storage: Arc::new(storage),
    };
    Router::new()
        .route("/v2", get(api_root))
        .route("/v2/", get(api_root))
        .route("/v2/*path", get(dispatch).fallback(unsupported))
        .fallback(not_found)
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    errors: Vec<ErrorDetail<'a>>,
}

fn registry_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        errors: vec![ErrorDetail {
            code,
            message: message.into(),
        }],
    };
    (status, [(API_VERSION_HEADER, API_VERSION)], Json(body)).into_response()
}

fn internal_error(err: SyncError) -> Response {
    tracing::error!(error = %err, "registry storage failure");
    registry_error(StatusCode::INTERNAL_SERVER_ERROR, "UNKNOWN", err.to_string())
}

async fn api_root() -> Response {
    (
        StatusCode::OK,
        [(API_VERSION_HEADER, API_VERSION)],
        Json(serde_json::json!({})),
    )
        .into_response()
}

async fn not_found() -> Response {
    registry_error(StatusCode::NOT_FOUND, "NOT_FOUND", "unknown route")
}

async fn unsupported() -> Response {
    registry_error(
        StatusCode::METHOD_NOT_ALLOWED,
        "UNSUPPORTED",
        "this registry is read-only",
    )
}

#[derive(Debug, Default, Deserialize)]
struct CatalogQuery {
    n: Option<usize>,
    last: Option<String>,
}

#[derive(Serialize)]
struct CatalogBody {
    repositories: Vec<String>,
}

#[derive(Serialize)]
struct TagsBody {
    name: String,
    tags: Vec<String>,
}

/// Request shapes under `/v2/`, split off the end of the path since names contain `/`.
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Catalog,
    Tags(&'a str),
    Manifest(&'a str, &'a str),
    Blob(&'a str, &'a str),
}

impl<'a> Route<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let path = path.trim_start_matches('/');
        if path == "_catalog" {
            return Some(Route::Catalog);
        }
        if let Some(name) = path.strip_suffix("/tags/list") {
            return Some(Route::Tags(name));
        }
        if let Some((name, reference)) = path.rsplit_once("/manifests/") {
            return Some(Route::Manifest(name, reference));
        }
        if let Some((name, digest)) = path.rsplit_once("/blobs/") {
            return Some(Route::Blob(name, digest));
        }
        None
    }
}

async fn dispatch(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<CatalogQuery>,
) -> Response {
    match Route::parse(&path) {
        Some(Route::Catalog) => catalog(&state, query).await,
        Some(Route::Tags(name)) => tags(&state, name).await,
        Some(Route::Manifest(name, reference)) => manifest(&state, name, reference).await,
        Some(Route::Blob(name, digest)) => blob(&state, name, digest).await,
        None => not_found().await,
    }
}

async fn catalog(state: &AppState, query: CatalogQuery) -> Response {
    let names = match state.storage.catalog().await {
        Ok(names) => names,
        Err(e) => return internal_error(e),
    };

    let mut remaining: Vec<String> = match &query.last {
        Some(last) => names.into_iter().filter(|n| n > last).collect(),
        None => names,
    };

    let mut headers = HeaderMap::new();
    headers.insert(API_VERSION_HEADER, API_VERSION);

    if let Some(n) = query.n {
        if remaining.len() > n {
            remaining.truncate(n);
            if let Some(last) = remaining.last() {
                let link = format!("</v2/_catalog?last={}&n={}>; rel=\"next\"", last, n);
                if let Ok(value) = HeaderValue::from_str(&link) {
                    headers.insert(header::LINK, value);
                }
            }
        }
    }

    (
        StatusCode::OK,
        headers,
        Json(CatalogBody {
            repositories: remaining,
        }),
    )
        .into_response()
}

async fn tags(state: &AppState, name: &str) -> Response {
    match state.storage.tags(name).await {
        Ok(Some(tags)) => (
            StatusCode::OK,
            [(API_VERSION_HEADER, API_VERSION)],
            Json(TagsBody {
                name: name.to_string(),
                tags,
            }),
        )
            .into_response(),
        Ok(None) => registry_error(
            StatusCode::NOT_FOUND,
            "NAME_UNKNOWN",
            format!("repository name not known to registry: {}", name),
        ),
        Err(e) => internal_error(e),
    }
}

async fn manifest(state: &AppState, name: &str, reference: &str) -> Response {
    match state.storage.manifest(name, reference).await {
        Ok(Some(stored)) => {
            let mut headers = HeaderMap::new();
            headers.insert(API_VERSION_HEADER, API_VERSION);
            if let Ok(value) = HeaderValue::from_str(&stored.media_type) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            if let Ok(value) = HeaderValue::from_str(&stored.digest) {
                headers.insert(CONTENT_DIGEST_HEADER, value);
            }
            (StatusCode::OK, headers, stored.data).into_response()
        }
        Ok(None) => registry_error(
            StatusCode::NOT_FOUND,
            "MANIFEST_UNKNOWN",
            format!("manifest unknown: {}:{}", name, reference),
        ),
        Err(e) => internal_error(e),
    }
}

async fn blob(state: &AppState, name: &str, digest: &str) -> Response {
    let path = match state.storage.linked_blob(name, digest).await {
        Ok(Some(path)) => path,
        Ok(None) => {
            return registry_error(
                StatusCode::NOT_FOUND,
                "BLOB_UNKNOWN",
                format!("blob unknown to registry: {}", digest),
            );
        }
        Err(e) => return internal_error(e),
    };

    match tokio::fs::read(&path).await {
        Ok(data) => {
            let mut headers = HeaderMap::new();
            headers.insert(API_VERSION_HEADER, API_VERSION);
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            if let Ok(value) = HeaderValue::from_str(digest) {
                headers.insert(CONTENT_DIGEST_HEADER, value);
            }
            (StatusCode::OK, headers, data).into_response()
        }
        Err(e) => internal_error(SyncError::io(path, e)),
    }
}
