//! Dispatches embedding calls to the correct per-modality backend, derives
//! deterministic space keys, and batches inputs across modalities.

pub mod media;
pub mod text;

use crate::config::{EmbedConfig, EmbedContainerConfig};
use crate::error::{RagError, Result};
use crate::model::{space_key, Modality};
use media::MediaEmbedder;
use std::path::PathBuf;
use text::TextEmbedder;

/// One configured embed backend plus its resolved identity.
pub struct EmbedContainer {
    pub provider: String,
    pub model: String,
    pub alias: String,
    pub dimensions: usize,
    pub space_key: String,
    backend: Backend,
}

enum Backend {
    Text(TextEmbedder),
    Media(MediaEmbedder),
}

impl EmbedContainer {
    fn new_text(cfg: &EmbedContainerConfig, modality: Modality, api_key: String) -> Result<Self> {
        let alias = cfg.alias.clone().unwrap_or_else(|| cfg.model.clone());
        let space_key = space_key(&cfg.provider, &alias, modality)?;
        let embedder = TextEmbedder::new(api_key, cfg.model.clone(), cfg.batch_size)
            .with_endpoint(text_endpoint(&cfg.provider));
        Ok(Self {
            provider: cfg.provider.clone(),
            model: cfg.model.clone(),
            alias,
            dimensions: cfg.dimensions,
            space_key,
            backend: Backend::Text(embedder),
        })
    }

    fn new_media(
        cfg: &EmbedContainerConfig,
        modality: Modality,
        api_key: String,
        endpoint: String,
    ) -> Result<Self> {
        let alias = cfg.alias.clone().unwrap_or_else(|| cfg.model.clone());
        let space_key = space_key(&cfg.provider, &alias, modality)?;
        Ok(Self {
            provider: cfg.provider.clone(),
            model: cfg.model.clone(),
            alias,
            dimensions: cfg.dimensions,
            space_key,
            backend: Backend::Media(MediaEmbedder::new(
                endpoint,
                api_key,
                cfg.model.clone(),
                cfg.batch_size,
            )),
        })
    }
}

/// The endpoint a provider's media embedder listens on. Anything beyond the
/// default HTTP contract is a caller-supplied integration detail.
fn media_endpoint(provider: &str) -> String {
    std::env::var(format!("{}_EMBED_ENDPOINT", provider.to_uppercase()))
        .unwrap_or_else(|_| "http://localhost:8090/v1/embeddings".to_string())
}

/// The endpoint a provider's text embedder listens on. `OPENAI_EMBED_ENDPOINT`
/// (or `{PROVIDER}_EMBED_ENDPOINT` for a non-OpenAI provider) overrides the
/// OpenAI default, mirroring `media_endpoint`.
fn text_endpoint(provider: &str) -> String {
    std::env::var(format!("{}_EMBED_ENDPOINT", provider.to_uppercase()))
        .unwrap_or_else(|_| "https://api.openai.com/v1/embeddings".to_string())
}

/// Per-modality embed containers, batching policy, and fallback behavior.
pub struct EmbedManager {
    text: Option<EmbedContainer>,
    image: Option<EmbedContainer>,
    audio: Option<EmbedContainer>,
    video: Option<EmbedContainer>,
    pub concurrency: usize,
    pub batch_interval_ms: u64,
    pub use_modality_fallback: bool,
}

impl EmbedManager {
    pub fn from_config(cfg: &EmbedConfig) -> Result<Self> {
        let text = cfg
            .text
            .as_ref()
            .map(|c| {
                let key = std::env::var(&c.api_key_env).map_err(|_| {
                    RagError::Config(format!("{} not set for embed.text", c.api_key_env))
                })?;
                EmbedContainer::new_text(c, Modality::Text, key)
            })
            .transpose()?;

        let image = cfg
            .image
            .as_ref()
            .map(|c| {
                let key = std::env::var(&c.api_key_env).map_err(|_| {
                    RagError::Config(format!("{} not set for embed.image", c.api_key_env))
                })?;
                EmbedContainer::new_media(c, Modality::Image, key, media_endpoint(&c.provider))
            })
            .transpose()?;

        let audio = cfg
            .audio
            .as_ref()
            .map(|c| {
                let key = std::env::var(&c.api_key_env).map_err(|_| {
                    RagError::Config(format!("{} not set for embed.audio", c.api_key_env))
                })?;
                EmbedContainer::new_media(c, Modality::Audio, key, media_endpoint(&c.provider))
            })
            .transpose()?;

        let video = cfg
            .video
            .as_ref()
            .map(|c| {
                let key = std::env::var(&c.api_key_env).map_err(|_| {
                    RagError::Config(format!("{} not set for embed.video", c.api_key_env))
                })?;
                EmbedContainer::new_media(c, Modality::Video, key, media_endpoint(&c.provider))
            })
            .transpose()?;

        Ok(Self {
            text,
            image,
            audio,
            video,
            concurrency: cfg.concurrency.max(1),
            batch_interval_ms: cfg.batch_interval_ms,
            use_modality_fallback: cfg.use_modality_fallback,
        })
    }

    pub fn container(&self, modality: Modality) -> Option<&EmbedContainer> {
        match modality {
            Modality::Text => self.text.as_ref(),
            Modality::Image => self.image.as_ref(),
            Modality::Audio => self.audio.as_ref(),
            Modality::Video => self.video.as_ref(),
        }
    }

    /// Whether a video embed container is configured. The pipeline consults
    /// this to decide whether to fall back to per-frame image embedding.
    pub fn has_video_container(&self) -> bool {
        self.video.is_some()
    }

    /// Embed non-empty text inputs, trimmed, through the text container.
    pub async fn embed_text(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let container = self
            .text
            .as_ref()
            .ok_or_else(|| RagError::UnsupportedProvider("embed.text is not configured".into()))?;
        for input in &inputs {
            if input.trim().is_empty() {
                return Err(RagError::InvalidInput(
                    "text embed input must be non-empty after trim".into(),
                ));
            }
        }
        match &container.backend {
            Backend::Text(t) => t.embed_batch(inputs).await,
            Backend::Media(_) => Err(RagError::Config(
                "embed.text container is misconfigured as a media backend".into(),
            )),
        }
    }

    /// Embed a single query string through the text container, using its
    /// query cache if configured.
    pub async fn embed_text_query(&self, query: &str) -> Result<Vec<f32>> {
        let container = self
            .text
            .as_ref()
            .ok_or_else(|| RagError::UnsupportedProvider("embed.text is not configured".into()))?;
        match &container.backend {
            Backend::Text(t) => t.embed_with_retry(query, 3).await,
            Backend::Media(_) => Err(RagError::Config(
                "embed.text container is misconfigured as a media backend".into(),
            )),
        }
    }

    pub async fn embed_image(&self, paths: Vec<PathBuf>) -> Result<Vec<Vec<f32>>> {
        self.embed_media(Modality::Image, paths).await
    }

    pub async fn embed_audio(&self, paths: Vec<PathBuf>) -> Result<Vec<Vec<f32>>> {
        self.embed_media(Modality::Audio, paths).await
    }

    /// Embed video inputs. Callers MUST check `has_video_container` first
    /// when `use_modality_fallback` should apply instead of erroring.
    pub async fn embed_video(&self, paths: Vec<PathBuf>) -> Result<Vec<Vec<f32>>> {
        self.embed_media(Modality::Video, paths).await
    }

    async fn embed_media(&self, modality: Modality, paths: Vec<PathBuf>) -> Result<Vec<Vec<f32>>> {
        let container = self.container(modality).ok_or_else(|| {
            RagError::UnsupportedProvider(format!("embed.{modality} is not configured"))
        })?;
        for path in &paths {
            if !path.exists() {
                return Err(RagError::InvalidInput(format!(
                    "{modality} embed input does not exist: {}",
                    path.display()
                )));
            }
        }
        match &container.backend {
            Backend::Media(m) => m.embed_batch(paths).await,
            Backend::Text(_) => Err(RagError::Config(format!(
                "embed.{modality} container is misconfigured as a text backend"
            ))),
        }
    }

    /// Encode a text query into `modality`'s vector space for cross-modal
    /// retrieval (text -> image/audio/video). Errors with
    /// `UnsupportedCrossModal` when no container is configured for that
    /// modality, since that is exactly the "encoder lacks this capability"
    /// case callers need to distinguish from a transient provider failure.
    pub async fn embed_text_as(&self, modality: Modality, query: &str) -> Result<Vec<f32>> {
        if modality == Modality::Text {
            return self.embed_text_query(query).await;
        }
        let container = self
            .container(modality)
            .ok_or_else(|| RagError::UnsupportedCrossModal(format!("embed.{modality} is not configured")))?;
        match &container.backend {
            Backend::Media(m) => m.embed_text_query(query).await,
            Backend::Text(_) => Err(RagError::Config(format!(
                "embed.{modality} container is misconfigured as a text backend"
            ))),
        }
    }

    /// Encode local files into `modality`'s vector space for cross-modal
    /// retrieval (e.g. an image file queried against the video space). The
    /// files need not match `modality`'s own kind; it is the target space
    /// that matters.
    pub async fn embed_paths_as(&self, modality: Modality, paths: Vec<PathBuf>) -> Result<Vec<Vec<f32>>> {
        let container = self
            .container(modality)
            .ok_or_else(|| RagError::UnsupportedCrossModal(format!("embed.{modality} is not configured")))?;
        for path in &paths {
            if !path.exists() {
                return Err(RagError::InvalidInput(format!(
                    "embed input does not exist: {}",
                    path.display()
                )));
            }
        }
        match &container.backend {
            Backend::Media(m) => m.embed_batch(paths).await,
            Backend::Text(_) => Err(RagError::Config(format!(
                "embed.{modality} container is misconfigured as a text backend"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbedContainerConfig;

    fn text_container_cfg() -> EmbedContainerConfig {
        EmbedContainerConfig {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            alias: Some("te3small".to_string()),
            dimensions: 1536,
            api_key_env: "TEST_EMBED_API_KEY".to_string(),
            batch_size: 100,
        }
    }

    #[test]
    fn test_embed_manager_missing_container_errors() {
        let manager = EmbedManager {
            text: None,
            image: None,
            audio: None,
            video: None,
            concurrency: 4,
            batch_interval_ms: 0,
            use_modality_fallback: true,
        };
        assert!(!manager.has_video_container());
    }

    #[test]
    fn test_container_space_key_stable_across_calls() {
        std::env::set_var("TEST_EMBED_API_KEY", "key");
        let cfg = text_container_cfg();
        let a = EmbedContainer::new_text(&cfg, Modality::Text, "key".to_string()).unwrap();
        let b = EmbedContainer::new_text(&cfg, Modality::Text, "key".to_string()).unwrap();
        assert_eq!(a.space_key, b.space_key);
        std::env::remove_var("TEST_EMBED_API_KEY");
    }

    #[tokio::test]
    async fn test_embed_text_rejects_empty_input() {
        std::env::set_var("TEST_EMBED_API_KEY", "key");
        let cfg = text_container_cfg();
        let container = EmbedContainer::new_text(&cfg, Modality::Text, "key".to_string()).unwrap();
        let manager = EmbedManager {
            text: Some(container),
            image: None,
            audio: None,
            video: None,
            concurrency: 4,
            batch_interval_ms: 0,
            use_modality_fallback: true,
        };
        let err = manager.embed_text(vec!["  ".to_string()]).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
        std::env::remove_var("TEST_EMBED_API_KEY");
    }

    #[tokio::test]
    async fn test_embed_video_without_container_is_unsupported_provider() {
        let manager = EmbedManager {
            text: None,
            image: None,
            audio: None,
            video: None,
            concurrency: 4,
            batch_interval_ms: 0,
            use_modality_fallback: true,
        };
        let err = manager
            .embed_video(vec![PathBuf::from("/tmp/clip.mp4")])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UnsupportedProvider(_)));
    }

    #[tokio::test]
    async fn test_embed_text_as_image_without_container_is_cross_modal_unsupported() {
        let manager = EmbedManager {
            text: None,
            image: None,
            audio: None,
            video: None,
            concurrency: 4,
            batch_interval_ms: 0,
            use_modality_fallback: true,
        };
        let err = manager.embed_text_as(Modality::Image, "a cat").await.unwrap_err();
        assert!(matches!(err, RagError::UnsupportedCrossModal(_)));
    }

    #[tokio::test]
    async fn test_embed_paths_as_without_container_is_cross_modal_unsupported() {
        let manager = EmbedManager {
            text: None,
            image: None,
            audio: None,
            video: None,
            concurrency: 4,
            batch_interval_ms: 0,
            use_modality_fallback: true,
        };
        let err = manager
            .embed_paths_as(Modality::Video, vec![PathBuf::from("/tmp/a.png")])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UnsupportedCrossModal(_)));
    }
}
