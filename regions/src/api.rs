use crate::cache::RegionCache;
use crate::types::Region;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use shared::config::Listener;
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum RegionsApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub async fn serve(listener: &Listener, cache: RegionCache) -> Result<(), RegionsApiError> {
    let listener = TcpListener::bind(listener.addr()).await?;
    serve_listener(listener, cache).await
}

/// Serves the API on an already bound listener. The cache starts loading
/// right away so `/ready` does not depend on the first lookup.
pub async fn serve_listener(listener: TcpListener, cache: RegionCache) -> Result<(), RegionsApiError> {
    cache.warm();
    tracing::info!(addr = %listener.local_addr()?, "Region API listening");
    axum::serve(listener, router(cache)).await?;
    Ok(())
}

pub fn router(cache: RegionCache) -> Router {
    Router::new()
        .route("/regions", get(list_regions))
        .route("/regions/{country_code}", get(region_by_country))
        .route("/regions/id/{id}", get(region_by_id))
        .route("/health", get(|| async { "ok\n" }))
        .route("/ready", get(ready))
        .with_state(cache)
}

#[derive(Serialize)]
struct RegionsResponse {
    regions: Vec<Region>,
}

#[derive(Serialize)]
struct RegionResponse {
    region: Region,
}

impl IntoResponse for RegionResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

struct RegionNotFound;

impl IntoResponse for RegionNotFound {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorResponse {
            error_message: "region not found".into(),
        });
        (StatusCode::NOT_FOUND, body).into_response()
    }
}

async fn list_regions(State(cache): State<RegionCache>) -> Json<RegionsResponse> {
    let regions = cache
        .list_regions()
        .await
        .iter()
        .map(|r| Region::clone(r))
        .collect();
    Json(RegionsResponse { regions })
}

async fn region_by_country(
    State(cache): State<RegionCache>,
    Path(country_code): Path<String>,
) -> RegionResponse {
    let region = cache.get_region(&country_code).await;
    RegionResponse {
        region: Region::clone(&region),
    }
}

async fn region_by_id(
    State(cache): State<RegionCache>,
    Path(id): Path<String>,
) -> Result<RegionResponse, RegionNotFound> {
    cache
        .retrieve_region(&id)
        .await
        .map(|region| RegionResponse {
            region: Region::clone(&region),
        })
        .ok_or(RegionNotFound)
}

async fn ready(State(cache): State<RegionCache>) -> (StatusCode, &'static str) {
    match cache.is_ready() {
        true => (StatusCode::OK, "ok\n"),
        false => (StatusCode::SERVICE_UNAVAILABLE, "not ready\n"),
    }
}
