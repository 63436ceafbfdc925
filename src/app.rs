use crate::catalog::{self, CatalogApi, CatalogClient};
use crate::config::Config;
use crate::error::CatalogError;
use crate::models::{format_cents, CatalogItem, ContentType, SearchResult};
use crate::poster::PosterCache;
use crate::session::Session;
use crate::storage::{FileStorage, Storage};
use anyhow::Result;
use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::TypedHeader;
use constant_time_eq::constant_time_eq;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogApi>,
    pub session: Arc<Mutex<Session>>,
    pub posters: PosterCache,
    pub api_token: Option<String>,
}

impl AppState {
    pub fn new(catalog: Arc<dyn CatalogApi>, session: Session, api_token: Option<String>) -> Self {
        Self {
            posters: PosterCache::new(catalog.clone()),
            catalog,
            session: Arc::new(Mutex::new(session)),
            api_token,
        }
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let catalog: Arc<dyn CatalogApi> =
        Arc::new(CatalogClient::new(&config.base_url, &config.api_key)?);
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(&config.data_dir)?);
    info!("Persisting session state in {}", config.data_dir.display());
    let session = Session::load(storage, config.pricing);
    if config.api_token.is_none() {
        warn!("MOVIETIME_API_TOKEN not set; API is unauthenticated");
    }

    let app = build_router(AppState::new(catalog, session, config.api_token));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/popular/:kind", get(popular))
        .route("/search", get(search))
        .route("/search/resolve", post(resolve_search))
        .route("/titles/:id", get(title_detail))
        .route("/titles/:id/images", get(title_images))
        .route("/titles/:id/header", get(title_header))
        .route("/titles/:id/status", get(title_status))
        .route("/favorites", get(list_favorites).put(add_favorite))
        .route("/favorites/:id", delete(remove_favorite))
        .route("/cart", get(list_cart).put(add_to_cart))
        .route("/cart/:id", delete(remove_from_cart))
        .route("/checkout", post(checkout))
        .route("/library", get(list_library).put(add_to_library))
        .route("/library/:id", delete(remove_from_library))
        .route("/posters/:id", get(poster))
        .route("/memory-warning", post(memory_warning))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn require_token(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(request).await;
    };
    let presented = bearer.map(|TypedHeader(auth)| auth.token().to_string());
    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        _ => {
            warn!("Rejecting request with missing or invalid token");
            error_response(StatusCode::UNAUTHORIZED, "Invalid or missing API token")
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    (status, Json(json!({ "status": "error", "message": message }))).into_response()
}

struct ApiError(CatalogError);

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CatalogError::Api(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CatalogError::Network(_) | CatalogError::Decode(_) => StatusCode::BAD_GATEWAY,
        };
        warn!("Catalog request failed: {}", self.0);
        error_response(status, self.0.to_string())
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Deserialize)]
struct PopularQuery {
    filter: Option<String>,
}

async fn popular(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<PopularQuery>,
) -> Response {
    let content_type: ContentType = match kind.parse() {
        Ok(ct) => ct,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match state.catalog.popular(content_type).await {
        Ok(items) => {
            let items = match query.filter.as_deref() {
                Some(term) => catalog::filter_by_title(&items, term),
                None => items,
            };
            Json(items).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

async fn search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    let term = query.q.unwrap_or_default();
    if term.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing search term");
    }
    debug!("Searching catalog for '{}'", term);
    match state.catalog.search(&term).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn resolve_search(
    State(state): State<AppState>,
    Json(result): Json<SearchResult>,
) -> ApiResult<Json<CatalogItem>> {
    Ok(Json(state.catalog.resolve(&result).await?))
}

async fn title_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let detail = state.catalog.detail(&id).await?;
    Ok(Json(detail).into_response())
}

async fn title_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let images = state.catalog.images(&id).await?;
    Ok(Json(images).into_response())
}

async fn title_header(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let (images, detail) = tokio::join!(state.catalog.images(&id), state.catalog.detail(&id));
    let detail = detail?;
    let images = images
        .map_err(|e| debug!("No backdrops for {}: {}", id, e))
        .ok();
    let header = catalog::choose_header(images.as_ref(), &detail.item.poster);
    Ok(Json(header).into_response())
}

async fn title_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let mut session = state.session.lock().await;
    Json(session.status(&id)).into_response()
}

async fn list_favorites(State(state): State<AppState>) -> Response {
    let session = state.session.lock().await;
    Json(session.favorites()).into_response()
}

async fn add_favorite(State(state): State<AppState>, Json(item): Json<CatalogItem>) -> StatusCode {
    let mut session = state.session.lock().await;
    debug!("Adding favorite {}", item.id);
    session.add_favorite(item);
    StatusCode::NO_CONTENT
}

async fn remove_favorite(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    let mut session = state.session.lock().await;
    session.remove_favorite(&id);
    StatusCode::NO_CONTENT
}

async fn list_cart(State(state): State<AppState>) -> Response {
    let session = state.session.lock().await;
    let total_cents = session.cart_total_cents();
    Json(json!({
        "items": session.cart(),
        "unit_price_cents": session.pricing().unit_price_cents,
        "total_cents": total_cents,
        "total": format_cents(total_cents),
    }))
    .into_response()
}

async fn add_to_cart(State(state): State<AppState>, Json(item): Json<CatalogItem>) -> StatusCode {
    let mut session = state.session.lock().await;
    if session.add_to_cart(item) {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

async fn remove_from_cart(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    let mut session = state.session.lock().await;
    session.remove_from_cart(&id);
    StatusCode::NO_CONTENT
}

async fn checkout(State(state): State<AppState>) -> Response {
    let mut session = state.session.lock().await;
    match session.checkout() {
        Some(receipt) => {
            info!("Rented {} titles for {}", receipt.items.len(), receipt);
            let total = receipt.to_string();
            Json(json!({
                "items": receipt.items,
                "unit_price_cents": receipt.unit_price_cents,
                "total_cents": receipt.total_cents,
                "total": total,
            }))
            .into_response()
        }
        None => error_response(StatusCode::CONFLICT, "Cart is empty"),
    }
}

async fn list_library(State(state): State<AppState>) -> Response {
    let mut session = state.session.lock().await;
    Json(session.library()).into_response()
}

async fn add_to_library(
    State(state): State<AppState>,
    Json(item): Json<CatalogItem>,
) -> StatusCode {
    let mut session = state.session.lock().await;
    session.add_to_library(item);
    StatusCode::CREATED
}

async fn remove_from_library(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    let mut session = state.session.lock().await;
    session.remove_from_library(&id);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct PosterQuery {
    size: Option<String>,
}

// Image URLs come from the catalog record, never from the caller.
async fn poster(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PosterQuery>,
) -> ApiResult<Response> {
    let full = match query.size.as_deref() {
        None | Some("thumb") => false,
        Some("full") => true,
        Some(other) => {
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                format!("Unknown poster size '{}'", other),
            ))
        }
    };
    let key = if full { format!("{id}:full") } else { id.clone() };

    let poster = match state.posters.get(&key).await {
        Some(poster) => poster,
        None => {
            let detail = state.catalog.detail(&id).await?;
            let image = if full {
                detail.item.poster
            } else {
                detail.item.thumbnail
            };
            if image.url.is_empty() {
                return Ok(error_response(StatusCode::NOT_FOUND, "Title has no poster"));
            }
            state.posters.get_or_fetch(&key, &image.url).await?
        }
    };
    Ok(([(header::CONTENT_TYPE, poster.content_type())], poster.bytes.clone()).into_response())
}

async fn memory_warning(State(state): State<AppState>) -> StatusCode {
    state.posters.clear().await;
    StatusCode::NO_CONTENT
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
