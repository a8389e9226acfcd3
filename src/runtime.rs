//! Process-wide singleton holding the loaded config and every client built
//! from it: the database handle, the embed manager, and the optional rerank
//! manager. Grounded on
//! `examples/original_source/src/raggify/runtime.py`'s `Runtime` class --
//! `build()` drops everything and reloads config from disk, `rebuild()`
//! keeps the in-memory config but recreates the downstream clients, and
//! `_release()`/`atexit` become `shutdown()`. Python's per-attribute lazy
//! property plus a module-level `threading.Lock()` double-checked singleton
//! becomes a `tokio::sync::RwLock<Option<Runtime>>` static here: the whole
//! bundle is constructed together rather than attribute-by-attribute, since
//! there is no equivalent of re-entering a property getter to race against.

use crate::config::Config;
use crate::db::{migrate, Db};
use crate::embed::EmbedManager;
use crate::error::{RagError, Result};
use crate::retrieve::RerankManager;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything a request handler or background job needs. Cheap to clone --
/// every field is an `Arc` over a value shared with every other holder.
#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<Config>,
    pub db: Arc<Db>,
    pub embed: Arc<EmbedManager>,
    pub rerank: Arc<Option<RerankManager>>,
}

impl Runtime {
    async fn from_config(config: Config) -> Result<Self> {
        let migrations_dir = Path::new("migrations");

        let db = Db::new(config.vector_db_path());
        db.with_connection(move |conn| migrate::run_migrations(conn, migrations_dir))
            .await?;

        if config.document_db_path() != config.vector_db_path() {
            let document_db = Db::new(config.document_db_path());
            document_db
                .with_connection(move |conn| migrate::run_migrations(conn, migrations_dir))
                .await?;
        }

        let embed = EmbedManager::from_config(&config.embed)?;
        let rerank = RerankManager::from_config(&config.rerank)?;

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            embed: Arc::new(embed),
            rerank: Arc::new(rerank),
        })
    }

    async fn assemble() -> Result<Self> {
        let config = Config::load().map_err(|e| RagError::Config(e.to_string()))?;
        Self::from_config(config).await
    }
}

static RUNTIME: RwLock<Option<Runtime>> = RwLock::const_new(None);

/// Return the process-wide runtime, building it from `config.yaml` on first
/// call. Every caller after the first gets the same clients back.
pub async fn get() -> Result<Runtime> {
    if let Some(rt) = RUNTIME.read().await.as_ref() {
        return Ok(rt.clone());
    }
    let mut guard = RUNTIME.write().await;
    if let Some(rt) = guard.as_ref() {
        return Ok(rt.clone());
    }
    let rt = Runtime::assemble().await?;
    *guard = Some(rt.clone());
    Ok(rt)
}

/// Drop the current runtime, if any, and rebuild everything from a fresh
/// read of `config.yaml`. Backs the `/reload` endpoint: operators editing
/// config.yaml by hand expect the whole stack, provider clients included, to
/// pick up the new values.
pub async fn build() -> Result<Runtime> {
    let mut guard = RUNTIME.write().await;
    *guard = None;
    let rt = Runtime::assemble().await?;
    *guard = Some(rt.clone());
    Ok(rt)
}

/// Recreate the database handle, embed manager, and rerank manager from the
/// currently loaded config without re-reading it from disk. Useful after an
/// in-process config mutation where the file on disk hasn't changed.
pub async fn rebuild() -> Result<Runtime> {
    let mut guard = RUNTIME.write().await;
    let config = match guard.as_ref() {
        Some(rt) => (*rt.config).clone(),
        None => Config::load().map_err(|e| RagError::Config(e.to_string()))?,
    };
    let rt = Runtime::from_config(config).await?;
    *guard = Some(rt.clone());
    Ok(rt)
}

/// Release the runtime without rebuilding it. Called once at process
/// shutdown; the next `get()` call after this rebuilds from scratch.
pub async fn shutdown() {
    *RUNTIME.write().await = None;
}
