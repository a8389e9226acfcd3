use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Top-level configuration, loaded from a single layered YAML document.
///
/// Every section tolerates a missing key by falling back to its default, so a
/// partially-written `config.yaml` (or one written by an older version of the
/// binary) still loads.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub document_store: DocumentStoreConfig,
    #[serde(default)]
    pub ingest_cache: IngestCacheConfig,
    #[serde(default)]
    pub embed: EmbedConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub retrieve: RetrieveConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Project/knowledge-base identity and process-wide ambient settings.
///
/// `project` and `knowledge_base` seed every table name: `{project}__{kb}__{space}__{role}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default = "default_knowledge_base")]
    pub knowledge_base: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            knowledge_base: default_knowledge_base(),
            host: default_host(),
            port: default_port(),
            device: default_device(),
            log_level: default_log_level(),
        }
    }
}

fn default_project() -> String {
    "raggify".to_string()
}
fn default_knowledge_base() -> String {
    "default".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_device() -> String {
    "cpu".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Connection parameters for the SQLite-backed vector store.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_cache_load_limit")]
    pub cache_load_limit: usize,
    #[serde(default = "default_check_update")]
    pub check_update: bool,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cache_load_limit: default_cache_load_limit(),
            check_update: default_check_update(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./raggify.db")
}
fn default_cache_load_limit() -> usize {
    10_000
}
fn default_check_update() -> bool {
    true
}

/// Document store connection parameters. Shares the vector store's SQLite
/// file unless overridden.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentStoreConfig {
    pub db_path: Option<PathBuf>,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self { db_path: None }
    }
}

/// Ingest-cache (resumability) persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestCacheConfig {
    #[serde(default = "default_pipe_persist_dir")]
    pub persist_dir: PathBuf,
    #[serde(default = "default_ingest_cache_capacity")]
    pub capacity: usize,
}

impl Default for IngestCacheConfig {
    fn default() -> Self {
        Self {
            persist_dir: default_pipe_persist_dir(),
            capacity: default_ingest_cache_capacity(),
        }
    }
}

fn default_pipe_persist_dir() -> PathBuf {
    PathBuf::from("./.raggify/pipe_cache")
}
fn default_ingest_cache_capacity() -> usize {
    50_000
}

/// One embed container's configuration: model identity plus provider wiring.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbedContainerConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub alias: Option<String>,
    pub dimensions: usize,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_embed_batch_size() -> usize {
    100
}

/// Per-modality embed containers plus batching/fallback policy.
///
/// `video` is the only optional container: when absent, the pipeline falls
/// back to per-frame image embedding when `use_modality_fallback` is set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbedConfig {
    pub text: Option<EmbedContainerConfig>,
    pub image: Option<EmbedContainerConfig>,
    pub audio: Option<EmbedContainerConfig>,
    pub video: Option<EmbedContainerConfig>,
    #[serde(default = "default_embed_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub batch_interval_ms: u64,
    #[serde(default = "default_use_modality_fallback")]
    pub use_modality_fallback: bool,
}

fn default_embed_concurrency() -> usize {
    4
}
fn default_use_modality_fallback() -> bool {
    true
}

/// Reader, chunking, and web-fetch tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_audio_chunk_seconds")]
    pub audio_chunk_seconds: u64,
    #[serde(default = "default_video_chunk_seconds")]
    pub video_chunk_seconds: u64,
    #[serde(default = "default_req_per_sec")]
    pub req_per_sec: u32,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "default_same_origin")]
    pub same_origin: bool,
    #[serde(default = "default_max_asset_bytes")]
    pub max_asset_bytes: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_pipe_persist_dir")]
    pub pipe_persist_dir: PathBuf,
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub additional_exts: Vec<String>,
    #[serde(default = "default_load_asset")]
    pub load_asset: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            audio_chunk_seconds: default_audio_chunk_seconds(),
            video_chunk_seconds: default_video_chunk_seconds(),
            req_per_sec: default_req_per_sec(),
            timeout_sec: default_timeout_sec(),
            same_origin: default_same_origin(),
            max_asset_bytes: default_max_asset_bytes(),
            user_agent: default_user_agent(),
            upload_dir: default_upload_dir(),
            pipe_persist_dir: default_pipe_persist_dir(),
            batch_size: default_ingest_batch_size(),
            additional_exts: Vec::new(),
            load_asset: default_load_asset(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_audio_chunk_seconds() -> u64 {
    600
}
fn default_video_chunk_seconds() -> u64 {
    300
}
fn default_req_per_sec() -> u32 {
    5
}
fn default_timeout_sec() -> u64 {
    30
}
fn default_same_origin() -> bool {
    true
}
fn default_max_asset_bytes() -> u64 {
    20 * 1024 * 1024
}
fn default_user_agent() -> String {
    "raggify/0.1".to_string()
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("./.raggify/uploads")
}
fn default_ingest_batch_size() -> usize {
    50
}
fn default_load_asset() -> bool {
    true
}

/// Reranker backend wiring. Inactive unless `provider` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct RerankConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    #[serde(default = "default_rerank_topk")]
    pub topk: usize,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            topk: default_rerank_topk(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_rerank_topk() -> usize {
    10
}

/// Text retrieval mode and fusion weighting.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrieveConfig {
    #[serde(default = "default_retrieve_mode")]
    pub mode: String,
    #[serde(default = "default_bm25_topk")]
    pub bm25_topk: usize,
    #[serde(default = "default_fusion_lambda")]
    pub fusion_lambda_vector: f32,
    #[serde(default = "default_fusion_lambda")]
    pub fusion_lambda_bm25: f32,
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            mode: default_retrieve_mode(),
            bm25_topk: default_bm25_topk(),
            fusion_lambda_vector: default_fusion_lambda(),
            fusion_lambda_bm25: default_fusion_lambda(),
        }
    }
}

fn default_retrieve_mode() -> String {
    "fusion".to_string()
}
fn default_bm25_topk() -> usize {
    20
}
fn default_fusion_lambda() -> f32 {
    0.5
}

/// Optional LLM summarizer used by the pipeline's summarization stage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmConfig {
    pub text_model: Option<String>,
    pub image_caption_model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// HTTP server exposure settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub authless: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            api_key_env: default_http_api_key_env(),
            allowed_origins: Vec::new(),
            authless: false,
        }
    }
}

fn default_http_port() -> u16 {
    8080
}
fn default_http_api_key_env() -> String {
    "RAGGIFY_API_KEY".to_string()
}

impl Config {
    /// Load configuration from a single YAML document.
    ///
    /// Loads `.env` first (ignored if absent) so provider secrets can live
    /// there, then reads the file named by `RAGGIFY_CONFIG`, falling back to
    /// `./config.yaml`.
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RAGGIFY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.yaml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config =
            serde_yaml_ng::from_str(&config_str).context("Failed to parse config.yaml")?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(text) = &self.embed.text {
            std::env::var(&text.api_key_env).with_context(|| {
                format!(
                    "Environment variable {} not set for embed.text provider {}",
                    text.api_key_env, text.provider
                )
            })?;
        }
        for (label, container) in [
            ("embed.image", &self.embed.image),
            ("embed.audio", &self.embed.audio),
            ("embed.video", &self.embed.video),
        ] {
            if let Some(c) = container {
                std::env::var(&c.api_key_env).with_context(|| {
                    format!(
                        "Environment variable {} not set for {} provider {}",
                        c.api_key_env, label, c.provider
                    )
                })?;
            }
        }

        if self.ingest.chunk_size == 0 {
            anyhow::bail!("ingest.chunk_size must be greater than 0");
        }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            anyhow::bail!("ingest.chunk_overlap must be less than ingest.chunk_size");
        }
        if self.ingest.audio_chunk_seconds == 0 || self.ingest.video_chunk_seconds == 0 {
            anyhow::bail!("ingest.audio_chunk_seconds and video_chunk_seconds must be greater than 0");
        }
        if self.ingest.timeout_sec == 0 {
            anyhow::bail!("ingest.timeout_sec must be greater than 0");
        }

        if self.retrieve.bm25_topk == 0 {
            anyhow::bail!("retrieve.bm25_topk must be greater than 0");
        }
        for (name, lambda) in [
            ("retrieve.fusion_lambda_vector", self.retrieve.fusion_lambda_vector),
            ("retrieve.fusion_lambda_bm25", self.retrieve.fusion_lambda_bm25),
        ] {
            if !(0.0..=1.0).contains(&lambda) {
                anyhow::bail!("{} must be between 0.0 and 1.0", name);
            }
        }
        match self.retrieve.mode.as_str() {
            "vector_only" | "bm25_only" | "fusion" => {}
            other => anyhow::bail!(
                "retrieve.mode must be one of vector_only|bm25_only|fusion, got {}",
                other
            ),
        }

        std::fs::create_dir_all(&self.ingest.upload_dir).with_context(|| {
            format!(
                "Failed to create ingest.upload_dir: {}",
                self.ingest.upload_dir.display()
            )
        })?;
        std::fs::create_dir_all(&self.ingest_cache.persist_dir).with_context(|| {
            format!(
                "Failed to create ingest_cache.persist_dir: {}",
                self.ingest_cache.persist_dir.display()
            )
        })?;

        Ok(())
    }

    /// Database path for the vector store (and document store, unless overridden).
    pub fn vector_db_path(&self) -> &std::path::Path {
        &self.vector_store.db_path
    }

    /// Database path for the document store.
    pub fn document_db_path(&self) -> &std::path::Path {
        self.document_store
            .db_path
            .as_deref()
            .unwrap_or(&self.vector_store.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide cwd and env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn create_test_config(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        let upload_dir = temp_dir.path().join("uploads");
        let persist_dir = temp_dir.path().join("pipe_cache");
        format!(
            r#"
general:
  project: testproj
  knowledge_base: testkb
  log_level: debug

vector_store:
  db_path: "{db}"

ingest_cache:
  persist_dir: "{persist}"

embed:
  text:
    provider: openai
    model: text-embedding-3-small
    dimensions: 1536
    api_key_env: OPENAI_API_KEY

ingest:
  chunk_size: 300
  chunk_overlap: 50
  upload_dir: "{upload}"

retrieve:
  mode: fusion
  fusion_lambda_vector: 0.6
  fusion_lambda_bm25: 0.4
"#,
            db = db_path.display(),
            persist = persist_dir.display(),
            upload = upload_dir.display(),
        )
    }

    /// Restores cwd when dropped (e.g. on panic).
    struct CwdGuard(std::path::PathBuf);
    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    fn with_config_env(config_path: &std::path::Path, api_key: Option<&str>, f: impl FnOnce()) {
        let original_config = std::env::var("RAGGIFY_CONFIG").ok();
        let original_key = std::env::var("OPENAI_API_KEY").ok();
        std::env::set_var("RAGGIFY_CONFIG", config_path.to_str().unwrap());
        match api_key {
            Some(k) => std::env::set_var("OPENAI_API_KEY", k),
            None => std::env::remove_var("OPENAI_API_KEY"),
        }
        f();
        std::env::remove_var("RAGGIFY_CONFIG");
        std::env::remove_var("OPENAI_API_KEY");
        if let Some(val) = original_config {
            std::env::set_var("RAGGIFY_CONFIG", val);
        }
        if let Some(val) = original_key {
            std::env::set_var("OPENAI_API_KEY", val);
        }
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_content = create_test_config(&temp_dir);
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, config_content).unwrap();
        let config_path = config_path.canonicalize().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        let _cwd = CwdGuard(original_dir.clone());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, Some("test-key"), || {
            let config = Config::load();
            assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
            let config = config.unwrap();
            assert_eq!(config.general.log_level, "debug");
            assert_eq!(config.general.project, "testproj");
            assert_eq!(config.ingest.chunk_size, 300);
            assert_eq!(config.retrieve.fusion_lambda_vector, 0.6);
        });
    }

    #[test]
    fn test_config_missing_api_key() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_content = create_test_config(&temp_dir);
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, config_content).unwrap();
        let config_path = config_path.canonicalize().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        let _cwd = CwdGuard(original_dir.clone());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, None, || {
            let config = Config::load();
            assert!(config.is_err(), "Expected missing API key error");
            assert!(config.unwrap_err().to_string().contains("OPENAI_API_KEY"));
        });
    }

    #[test]
    fn test_config_invalid_chunk_overlap() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let mut content = create_test_config(&temp_dir);
        content = content.replace("chunk_overlap: 50", "chunk_overlap: 500");
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, content).unwrap();
        let config_path = config_path.canonicalize().unwrap();
        with_config_env(&config_path, Some("test-key"), || {
            let config = Config::load();
            assert!(config.is_err());
            assert!(config
                .unwrap_err()
                .to_string()
                .contains("chunk_overlap"));
        });
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("RAGGIFY_CONFIG").ok();
        std::env::set_var("RAGGIFY_CONFIG", "nonexistent.yaml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("RAGGIFY_CONFIG");
        if let Some(v) = original {
            std::env::set_var("RAGGIFY_CONFIG", v);
        }
    }
}
