use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{json, Value};
use starfind_core::identity::RenameMode;
use starfind_core::index::{tags, tags_value, TAGS};
use starfind_core::refresh::run_refresh;
use starfind_core::{
    DataPaths, ExtractorRegistry, IndexStore, Indexer, Metadata, RefreshOptions, SearchEngine, SearchError, Settings,
    SpellChecker,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const INVALID_QUERY: &str = "Invalid query format.";

pub struct ServerConfig {
    pub data_dir: PathBuf,
    /// Optional `term count` spelling dictionary loaded once at startup.
    pub dictionary: Option<PathBuf>,
}

pub struct AppState {
    pub store: IndexStore,
    pub extractors: ExtractorRegistry,
    pub paths: DataPaths,
    base_speller: SpellChecker,
    speller: RwLock<SpellChecker>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl AppState {
    /// Rebuild the spelling dictionary from the static word list plus the
    /// terms currently in the index.
    fn reload_speller(&self) -> starfind_core::Result<()> {
        let mut speller = self.base_speller.clone();
        speller.extend(self.store.term_frequencies()?);
        tracing::debug!(words = speller.word_count(), "spelling dictionary reloaded");
        *self.speller.write() = speller;
        Ok(())
    }
}

type SharedState = Arc<AppState>;
type ApiError = (StatusCode, Json<Value>);
type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Deserialize)]
pub struct IndexingRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub replace_filename: bool,
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub full_text: bool,
}

#[derive(Deserialize)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Deserialize)]
pub struct TagUpdate {
    pub path: String,
    pub tags: Vec<String>,
}

/// Build the router. The returned receiver fires once `/shutdown` has been
/// requested; the serving loop should stop gracefully when it does.
pub fn build_app(config: ServerConfig) -> anyhow::Result<(Router, oneshot::Receiver<()>)> {
    let paths = DataPaths::new(&config.data_dir);
    std::fs::create_dir_all(&paths.root)?;
    let store = IndexStore::open(paths.index())?;
    let settings = Settings::load(&paths.settings())?;

    let mut base_speller = SpellChecker::new().protect_operators(settings.protect_operators);
    if let Some(dictionary) = &config.dictionary {
        base_speller.load_dictionary(dictionary)?;
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let state = Arc::new(AppState {
        store,
        extractors: ExtractorRegistry::default(),
        paths,
        speller: RwLock::new(base_speller.clone()),
        base_speller,
        shutdown: Mutex::new(Some(shutdown_tx)),
    });
    state.reload_speller()?;

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/", get(home_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/indexing", post(indexing_handler))
        .route("/search", post(search_handler))
        .route("/tagging/tags", post(tags_handler))
        .route("/tagging/update", post(update_tags_handler))
        .route("/documents/remove", post(remove_handler))
        .route("/shutdown", get(shutdown_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok((app, shutdown_rx))
}

/// Run `work` on the blocking pool; the store and extractors do synchronous I/O.
async fn blocking<T, F>(state: &SharedState, work: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppState) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .map_err(internal)?
        .map_err(internal)
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() })))
}

fn not_indexed(path: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "error": format!("{path} is not indexed") })))
}

/// Home: keeps the index fresh by running one watchdog batch per visit.
pub async fn home_handler(State(state): State<SharedState>) -> ApiResult {
    blocking(&state, |state| {
        let settings = Settings::load(&state.paths.settings())?;
        let options = RefreshOptions {
            batch_size: settings.watchdog_number,
            recursive: settings.recursive,
            worklist: state.paths.worklist(),
        };
        let report = run_refresh(&state.store, &state.extractors, &options)?;
        state.reload_speller()?;
        Ok(Json(json!({
            "settings": settings,
            "reindexed": report.reindexed,
            "deleted": report.deleted,
            "newly_indexed": report.newly_indexed,
        })))
    })
    .await
}

pub async fn indexing_handler(State(state): State<SharedState>, Json(req): Json<IndexingRequest>) -> ApiResult {
    blocking(&state, move |state| {
        Settings::update(&state.paths.settings(), |s| {
            s.recursive = req.recursive;
            s.replace_filename = req.replace_filename;
        })?;
        let mode = RenameMode::from_replace_flag(req.replace_filename);
        let report = Indexer::new(&state.store, &state.extractors).index_path(&req.path, req.recursive, mode)?;
        state.reload_speller()?;
        Ok(Json(json!({ "indexed_count": report.discovered, "report": report })))
    })
    .await
}

pub async fn search_handler(State(state): State<SharedState>, Json(req): Json<SearchRequest>) -> ApiResult {
    let shared = Arc::clone(&state);
    let outcome = tokio::task::spawn_blocking(move || {
        let speller = shared.speller.read();
        let engine = SearchEngine::new(&shared.store, &shared.extractors, &speller);
        engine.search(&req.query, req.full_text)
    })
    .await
    .map_err(internal)?;

    match outcome {
        Ok(response) => Ok(Json(json!({ "results": response.results, "spellchecked": response.suggestion }))),
        Err(SearchError::InvalidQuery) => Err((StatusCode::BAD_REQUEST, Json(json!({ "error": INVALID_QUERY })))),
        Err(SearchError::Store(err)) => Err(internal(err)),
    }
}

pub async fn tags_handler(State(state): State<SharedState>, Json(req): Json<PathRequest>) -> ApiResult {
    let path = req.path.clone();
    let meta = blocking(&state, move |state| Ok(state.store.get_metadata(&req.path)?)).await?;
    match meta {
        Some(meta) => Ok(Json(json!({ "tag": meta.get(TAGS).cloned().unwrap_or(Value::Null) }))),
        None => Err(not_indexed(&path)),
    }
}

pub async fn update_tags_handler(State(state): State<SharedState>, Json(req): Json<TagUpdate>) -> ApiResult {
    let path = req.path.clone();
    let merged = blocking(&state, move |state| {
        let Some(meta) = state.store.get_metadata(&req.path)? else {
            return Ok(None);
        };
        let mut current = tags(&meta);
        current.extend(req.tags.iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()));
        let value = tags_value(current);
        let mut update = Metadata::new();
        update.insert(TAGS.into(), value.clone());
        state.store.update_metadata(&req.path, &update)?;
        Ok(Some(value))
    })
    .await?;
    match merged {
        Some(value) => Ok(Json(json!({ "tag": value }))),
        None => Err(not_indexed(&path)),
    }
}

pub async fn remove_handler(State(state): State<SharedState>, Json(req): Json<PathRequest>) -> ApiResult {
    blocking(&state, move |state| {
        let removed = state.store.remove_document(&req.path)?;
        Ok(Json(json!({ "removed": removed })))
    })
    .await
}

pub async fn shutdown_handler(State(state): State<SharedState>) -> Json<Value> {
    if let Some(tx) = state.shutdown.lock().take() {
        tracing::info!("shutdown requested");
        let _ = tx.send(());
    }
    Json(json!({ "message": "Server is shutting down" }))
}
