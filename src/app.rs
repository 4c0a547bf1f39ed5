use crate::aggregate::{self, AggregateError, MovieLookup};
use crate::config::Config;
use crate::credentials::{Credential, CredentialStore, JsonFileStore, StoreError};
use crate::tmdb::{ListKind, TmdbApi, TmdbClient};
use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{path::PathBuf, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

const MAX_BODY_BYTES: usize = 1024 * 1024; // 1MB safety cap

const MOVIE_ID_REQUIRED: &str = "Movie ID wajib disertakan.";
const TV_ID_REQUIRED: &str = "TV ID wajib disertakan.";
const MOVIE_UPSTREAM_FAILED: &str = "Gagal memuat data dari TMDB.";
const MOVIE_INTERNAL: &str = "Terjadi kesalahan internal saat memproses video.";
const MOVIE_NO_TRAILER: &str = "Trailer utama tidak ditemukan.";
const TV_UPSTREAM_FAILED: &str = "Gagal memuat data TV series dari TMDB.";
const TV_INTERNAL: &str = "Terjadi kesalahan internal.";
const CATALOG_FAILED: &str = "Gagal memuat semua film. Cek koneksi backend Anda.";
const CREDENTIALS_REQUIRED: &str = "Username and password are required.";
const INVALID_LOGIN: &str = "Invalid username or password.";
const USERNAME_TAKEN: &str = "Username is already registered.";
const INTERNAL: &str = "Internal server error.";

#[derive(Clone)]
pub struct AppState {
    pub tmdb: Arc<dyn TmdbApi>,
    pub store: Arc<dyn CredentialStore>,
    pub static_dir: Option<PathBuf>,
}

/// Error crossing the HTTP boundary: a status and a fixed client-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }

    fn bad_request(message: &'static str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(message: &'static str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let tmdb: Arc<dyn TmdbApi> = Arc::new(TmdbClient::from_config(&config)?);
    info!("Using TMDB at {}", config.tmdb_base_url);

    let store = JsonFileStore::new(config.users_file.clone());
    info!("Storing credentials in {:?}", store.path());

    let state = AppState {
        tmdb,
        store: Arc::new(store),
        static_dir: config.static_dir.clone(),
    };

    let app = build_router(state);

    let addr = config.socket_addr();
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/trending", listing(ListKind::Trending))
        .route("/api/top-rated", listing(ListKind::TopRated))
        .route("/api/upcoming", listing(ListKind::Upcoming))
        .route("/api/popular-tv", listing(ListKind::PopularTv))
        .route("/api/catalog", get(catalog))
        .route("/api/movie-details", get(missing_movie_id))
        .route("/api/movie-details/:id", get(movie_details))
        .route("/api/tv-details", get(missing_tv_id))
        .route("/api/tv-details/:id", get(tv_details))
        .route("/register", post(register))
        .route("/login", post(login));

    // Single-page client: unknown paths fall back to index.html.
    if let Some(dir) = state.static_dir.as_ref().filter(|d| d.exists()) {
        info!("Serving client bundle from {:?}", dir);
        let index = dir.join("index.html");
        app = app.fallback_service(
            ServeDir::new(dir)
                .append_index_html_on_directories(true)
                .not_found_service(ServeFile::new(index)),
        );
    }

    app.layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

fn listing_failure(kind: ListKind) -> &'static str {
    match kind {
        ListKind::Trending => "Gagal memuat data film dari server eksternal.",
        ListKind::TopRated => "Gagal memuat film Top Rated.",
        ListKind::Upcoming => "Gagal memuat film Akan Datang.",
        ListKind::PopularTv => "Gagal memuat Serial TV Populer.",
    }
}

fn listing(kind: ListKind) -> MethodRouter<AppState> {
    get(move |State(state): State<AppState>| async move { list_titles(&state, kind).await })
}

async fn list_titles(state: &AppState, kind: ListKind) -> Result<Json<Vec<Value>>, ApiError> {
    match aggregate::listing(state.tmdb.as_ref(), kind).await {
        Ok(titles) => Ok(Json(titles)),
        Err(e) => {
            error!("Failed to load {:?} listing from TMDB: {}", kind, e);
            Err(ApiError::internal(listing_failure(kind)))
        }
    }
}

async fn catalog(State(state): State<AppState>) -> Result<Json<aggregate::Catalog>, ApiError> {
    match aggregate::catalog(state.tmdb.as_ref()).await {
        Ok(catalog) => Ok(Json(catalog)),
        Err(e) => {
            error!("Failed to load catalog from TMDB: {}", e);
            Err(ApiError::internal(CATALOG_FAILED))
        }
    }
}

/// Accepts the positive integer ids TMDB uses.
pub fn parse_title_id(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok().filter(|id| *id > 0)
}

/// Maps a failed fan-out: an upstream status passes through, anything else is a 500.
fn aggregate_failure(
    err: AggregateError,
    upstream_message: &'static str,
    internal_message: &'static str,
) -> ApiError {
    match err {
        AggregateError::Upstream(status) => match StatusCode::from_u16(status) {
            Ok(status) => ApiError::new(status, upstream_message),
            Err(_) => ApiError::internal(upstream_message),
        },
        AggregateError::Failed(_) => ApiError::internal(internal_message),
    }
}

async fn missing_movie_id() -> ApiError {
    ApiError::bad_request(MOVIE_ID_REQUIRED)
}

async fn missing_tv_id() -> ApiError {
    ApiError::bad_request(TV_ID_REQUIRED)
}

async fn movie_details(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<aggregate::MovieDetail>, ApiError> {
    let id = parse_title_id(&raw_id).ok_or(ApiError::bad_request(MOVIE_ID_REQUIRED))?;

    match aggregate::movie_detail(state.tmdb.as_ref(), id).await {
        Ok(MovieLookup::Found(detail)) => Ok(Json(detail)),
        Ok(MovieLookup::NoTrailer) => {
            info!("No YouTube trailer for movie {}", id);
            Err(ApiError::new(StatusCode::NOT_FOUND, MOVIE_NO_TRAILER))
        }
        Err(e) => {
            error!("Failed to load movie {} from TMDB: {}", id, e);
            Err(aggregate_failure(e, MOVIE_UPSTREAM_FAILED, MOVIE_INTERNAL))
        }
    }
}

async fn tv_details(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<aggregate::TvDetail>, ApiError> {
    let id = parse_title_id(&raw_id).ok_or(ApiError::bad_request(TV_ID_REQUIRED))?;

    match aggregate::tv_detail(state.tmdb.as_ref(), id).await {
        Ok(detail) => Ok(Json(detail)),
        Err(e) => {
            error!("Failed to load TV series {} from TMDB: {}", id, e);
            Err(aggregate_failure(e, TV_UPSTREAM_FAILED, TV_INTERNAL))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CredentialsPayload {
    username: Option<String>,
    password: Option<String>,
}

impl CredentialsPayload {
    /// Both fields present and non-empty.
    fn into_credential(self) -> Option<Credential> {
        match (self.username, self.password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Credential::new(u, p)),
            _ => None,
        }
    }
}

fn read_credentials(
    payload: Result<Json<CredentialsPayload>, JsonRejection>,
) -> Result<Credential, ApiError> {
    let Json(payload) = payload.map_err(|e| {
        warn!("Rejecting credentials body: {}", e);
        ApiError::bad_request(CREDENTIALS_REQUIRED)
    })?;
    payload
        .into_credential()
        .ok_or(ApiError::bad_request(CREDENTIALS_REQUIRED))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let credential = read_credentials(payload)?;
    let username = credential.username.clone();

    match state.store.append(credential).await {
        Ok(()) => {
            info!("Registered user '{}'", username);
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "message": "User registered successfully.",
                    "user": { "username": username }
                })),
            ))
        }
        Err(StoreError::Conflict(_)) => {
            warn!("Registration refused: '{}' already exists", username);
            Err(ApiError::new(StatusCode::CONFLICT, USERNAME_TAKEN))
        }
        Err(e) => {
            error!("Failed to store registration for '{}': {}", username, e);
            Err(ApiError::internal(INTERNAL))
        }
    }
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsPayload>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let attempt = read_credentials(payload)?;

    let found = state
        .store
        .verify(&attempt.username, &attempt.password)
        .await
        .map_err(|e| {
            error!("Failed to read credentials: {}", e);
            ApiError::internal(INTERNAL)
        })?;

    match found {
        Some(found) => {
            info!("Login succeeded for '{}'", found.username);
            Ok(Json(json!({
                "message": "Login successful.",
                "user": { "username": found.username }
            })))
        }
        None => {
            warn!("Login failed for '{}'", attempt.username);
            Err(ApiError::new(StatusCode::UNAUTHORIZED, INVALID_LOGIN))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_positive_numeric_ids() {
        assert_eq!(parse_title_id("550"), Some(550));
        assert_eq!(parse_title_id(" 42 "), Some(42));
        assert_eq!(parse_title_id(""), None);
        assert_eq!(parse_title_id("0"), None);
        assert_eq!(parse_title_id("-5"), None);
        assert_eq!(parse_title_id("12abc"), None);
        assert_eq!(parse_title_id("99999999999"), None);
    }

    #[test]
    fn upstream_status_passes_through() {
        let err = aggregate_failure(AggregateError::Upstream(404), "up", "internal");
        assert_eq!(err, ApiError::new(StatusCode::NOT_FOUND, "up"));

        let err = aggregate_failure(
            AggregateError::Failed(anyhow::anyhow!("reset")),
            "up",
            "internal",
        );
        assert_eq!(err, ApiError::internal("internal"));
    }

    #[test]
    fn blank_credentials_are_rejected() {
        let payload = CredentialsPayload {
            username: Some("a".into()),
            password: Some(String::new()),
        };
        assert!(payload.into_credential().is_none());
        let payload = CredentialsPayload {
            username: None,
            password: Some("b".into()),
        };
        assert!(payload.into_credential().is_none());
    }
}
