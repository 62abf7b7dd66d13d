//! Admin HTTP API for the toxic proxy engine.
//!
//! Routes are scoped under a proxy name and built with `axum`.

pub mod dto;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::{CollectionError, ProxyError};
use crate::proxy::collection::{ToxicEnvelope, ToxicUpdate};
use crate::proxy::ProxyManager;
use dto::{CreateProxyRequest, ErrorBody, ProxyView};

/// Build the admin HTTP router.
pub fn build_router(manager: Arc<ProxyManager>) -> Router {
    Router::new()
        .route("/proxies", get(list_proxies).post(create_proxy))
        .route("/proxies/:name", get(get_proxy).delete(delete_proxy))
        .route("/proxies/:name/toxics", get(list_toxics).post(create_toxic))
        .route(
            "/proxies/:name/toxics/:toxic",
            get(get_toxic).post(update_toxic).delete(delete_toxic),
        )
        .with_state(manager)
}

/// Wraps [`ProxyError`] to give it an `axum` `IntoResponse` impl:
/// `UnknownKind`/`DecodeError` -> 400, `NameTaken` -> 409, `NotFound`
/// -> 404, anything else -> 500.
struct ApiError(ProxyError);

impl From<ProxyError> for ApiError {
    fn from(e: ProxyError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ProxyError::AlreadyExists(_) => StatusCode::CONFLICT,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Bind { .. } | ProxyError::Dial { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Collection(ce) => match ce {
                CollectionError::UnknownKind { .. } | CollectionError::DecodeError { .. } => {
                    StatusCode::BAD_REQUEST
                }
                CollectionError::NameTaken { .. } => StatusCode::CONFLICT,
                CollectionError::NotFound { .. } => StatusCode::NOT_FOUND,
            },
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

async fn list_proxies(State(manager): State<Arc<ProxyManager>>) -> Json<Vec<ProxyView>> {
    let proxies = manager.list().await;
    Json(proxies.iter().map(ProxyView::from).collect())
}

async fn create_proxy(
    State(manager): State<Arc<ProxyManager>>,
    Json(req): Json<CreateProxyRequest>,
) -> Result<Json<ProxyView>, ApiError> {
    let proxy = manager
        .create(req.name, req.listen, req.upstream, req.enabled)
        .await?;
    Ok(Json(ProxyView::from(&proxy)))
}

async fn get_proxy(
    State(manager): State<Arc<ProxyManager>>,
    Path(name): Path<String>,
) -> Result<Json<ProxyView>, ApiError> {
    let proxy = manager
        .get(&name)
        .await
        .ok_or_else(|| ProxyError::NotFound(name.clone()))?;
    Ok(Json(ProxyView::from(&proxy)))
}

async fn delete_proxy(
    State(manager): State<Arc<ProxyManager>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    manager.remove(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_toxics(
    State(manager): State<Arc<ProxyManager>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<crate::proxy::collection::ToxicView>>, ApiError> {
    let proxy = manager
        .get(&name)
        .await
        .ok_or_else(|| ProxyError::NotFound(name.clone()))?;
    Ok(Json(proxy.toxics.list().await))
}

async fn create_toxic(
    State(manager): State<Arc<ProxyManager>>,
    Path(name): Path<String>,
    Json(envelope): Json<ToxicEnvelope>,
) -> Result<Json<crate::proxy::collection::ToxicView>, ApiError> {
    let proxy = manager
        .get(&name)
        .await
        .ok_or_else(|| ProxyError::NotFound(name.clone()))?;
    let view = proxy.toxics.add(envelope).await.map_err(ProxyError::from)?;
    Ok(Json(view))
}

async fn get_toxic(
    State(manager): State<Arc<ProxyManager>>,
    Path((name, toxic)): Path<(String, String)>,
) -> Result<Json<crate::proxy::collection::ToxicView>, ApiError> {
    let proxy = manager
        .get(&name)
        .await
        .ok_or_else(|| ProxyError::NotFound(name.clone()))?;
    let view = proxy
        .toxics
        .get(&toxic)
        .await
        .ok_or_else(|| ProxyError::Collection(CollectionError::NotFound { name: toxic.clone() }))?;
    Ok(Json(view))
}

async fn update_toxic(
    State(manager): State<Arc<ProxyManager>>,
    Path((name, toxic)): Path<(String, String)>,
    Json(update): Json<ToxicUpdate>,
) -> Result<Json<crate::proxy::collection::ToxicView>, ApiError> {
    let proxy = manager
        .get(&name)
        .await
        .ok_or_else(|| ProxyError::NotFound(name.clone()))?;
    let view = proxy
        .toxics
        .update(&toxic, update)
        .await
        .map_err(ProxyError::from)?;
    Ok(Json(view))
}

async fn delete_toxic(
    State(manager): State<Arc<ProxyManager>>,
    Path((name, toxic)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let proxy = manager
        .get(&name)
        .await
        .ok_or_else(|| ProxyError::NotFound(name.clone()))?;
    proxy.toxics.remove(&toxic).await.map_err(ProxyError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
