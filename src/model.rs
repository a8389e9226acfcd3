//! Core domain types shared by readers, the embed manager, stores, and the
//! ingestion pipeline: modality tags, per-node metadata, content fingerprints,
//! and the node variants that flow through the pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{RagError, Result};

/// The four supported content modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
}

impl Modality {
    /// Short tag used when deriving a space key (`te`, `im`, `au`, `vi`).
    pub fn tag(self) -> &'static str {
        match self {
            Modality::Text => "te",
            Modality::Image => "im",
            Modality::Audio => "au",
            Modality::Video => "vi",
        }
    }

    /// Table-name role suffix for this modality's vector store.
    pub fn all() -> [Modality; 4] {
        [Modality::Text, Modality::Image, Modality::Audio, Modality::Video]
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::Audio => "audio",
            Modality::Video => "video",
        };
        write!(f, "{s}")
    }
}

/// Known file extensions by modality, mirroring the reference ingest
/// pipeline's dispatch tables.
pub mod exts {
    pub const IMAGE: &[&str] = &[".gif", ".jpg", ".png", ".jpeg", ".webp"];
    pub const AUDIO: &[&str] = &[".wav", ".flac", ".ogg", ".mp3"];
    pub const VIDEO: &[&str] = &[".wmv", ".mp4", ".avi"];
    pub const SITEMAP: &[&str] = &[".xml"];
    pub const PDF: &str = ".pdf";

    /// Extracts the lowercased extension (with leading dot) from a path or URL,
    /// ignoring any query string/fragment.
    pub fn get_ext(uri: &str) -> String {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        match path.rfind('.') {
            Some(idx) if path[idx..].len() > 1 => path[idx..].to_lowercase(),
            _ => String::new(),
        }
    }

    pub fn is_sitemap(uri: &str) -> bool {
        SITEMAP.contains(&get_ext(uri).as_str())
    }

    /// Classifies a path/URL's extension into a modality, if it's one of the
    /// recognized multimodal extension sets. Returns `None` for text/unknown
    /// extensions, which fall through to the default text reader.
    pub fn classify(uri: &str) -> Option<super::Modality> {
        let ext = get_ext(uri);
        if IMAGE.contains(&ext.as_str()) {
            Some(super::Modality::Image)
        } else if AUDIO.contains(&ext.as_str()) {
            Some(super::Modality::Audio)
        } else if VIDEO.contains(&ext.as_str()) {
            Some(super::Modality::Video)
        } else {
            None
        }
    }
}

/// Per-node metadata. Every field has a default so it persists uniformly
/// across readers and modalities; any field added here must stay in sync
/// with the meta store's column set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BasicMetaData {
    pub file_path: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_created_at: String,
    pub file_lastmod_at: String,
    pub chunk_no: u32,
    pub url: String,
    pub base_source: String,
    pub temp_file_path: String,
    pub page_no: u32,
    pub asset_no: u32,
}

impl BasicMetaData {
    /// Stable, order-independent content fingerprint over the identity
    /// fields. Two nodes with equal fingerprints are the same content for
    /// the same logical source and MUST NOT be re-embedded.
    pub fn fingerprint(&self) -> String {
        let mut fields: BTreeMap<&'static str, String> = BTreeMap::new();
        fields.insert("file_path", self.file_path.clone());
        fields.insert("file_size", self.file_size.to_string());
        fields.insert("file_lastmod_at", self.file_lastmod_at.clone());
        fields.insert("chunk_no", self.chunk_no.to_string());
        fields.insert("page_no", self.page_no.to_string());
        fields.insert("asset_no", self.asset_no.to_string());
        fields.insert("url", self.url.clone());

        let canonical = fields
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// The stable, content-derived source id the docstore uses for duplicate
    /// detection. Kept separate from `fingerprint` because it intentionally
    /// omits `asset_no` (many assets can share one source document) and uses
    /// raw fields rather than a hash, matching the reference pipeline's
    /// human-diagnosable id format.
    pub fn ref_doc_id(&self) -> String {
        let path_or_temp = if self.temp_file_path.is_empty() {
            self.file_path.as_str()
        } else {
            self.temp_file_path.as_str()
        };
        format!(
            "file_path:{path_or_temp}_file_size:{size}_file_lastmod_at:{lastmod}_page_no:{page}_url:{url}",
            size = self.file_size,
            lastmod = self.file_lastmod_at,
            page = self.page_no,
            url = self.url,
        )
    }
}

/// A node's modality-specific payload. Text carries text; media nodes carry
/// a local path to the asset (downloaded or pass-through).
#[derive(Debug, Clone)]
pub enum NodePayload {
    Text(String),
    Image(PathBuf),
    Audio(PathBuf),
    Video(PathBuf),
}

impl NodePayload {
    pub fn modality(&self) -> Modality {
        match self {
            NodePayload::Text(_) => Modality::Text,
            NodePayload::Image(_) => Modality::Image,
            NodePayload::Audio(_) => Modality::Audio,
            NodePayload::Video(_) => Modality::Video,
        }
    }
}

/// A unit of content flowing through the ingestion pipeline: one chunk, page,
/// or media asset, tagged with its modality, metadata, and (once embedded)
/// its vector.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub ref_doc_id: String,
    pub payload: NodePayload,
    pub metadata: BasicMetaData,
    pub embedding: Option<Vec<f32>>,
}

impl Node {
    pub fn new(payload: NodePayload, metadata: BasicMetaData) -> Self {
        let ref_doc_id = metadata.ref_doc_id();
        let id = format!(
            "{ref_doc_id}:{}:{}:{}",
            metadata.chunk_no, metadata.page_no, metadata.asset_no
        );
        Self {
            id,
            ref_doc_id,
            payload,
            metadata,
            embedding: None,
        }
    }

    pub fn modality(&self) -> Modality {
        self.payload.modality()
    }

    pub fn fingerprint(&self) -> String {
        self.metadata.fingerprint()
    }
}

const SANITIZE_MIN_LEN: usize = 3;
const SANITIZE_MAX_LEN: usize = 63;

/// Produces a name safe for use as a table/collection identifier:
/// `[A-Za-z0-9_]`, 3-63 characters, replaces any other character with `_`,
/// left-pads short inputs with `_`, and either MD5-hashes or rejects inputs
/// that remain too long after replacement.
///
/// Additionally guarantees the result starts and ends with an alphanumeric
/// character (`^[A-Za-z0-9][A-Za-z0-9_]{1,61}[A-Za-z0-9]$`), which the plain
/// replace-and-pad algorithm above does not: an input like `"___"` sanitizes
/// to `"___"`, which satisfies length but not the boundary requirement. A
/// non-alphanumeric first/last byte is replaced with a deterministic `x`.
pub fn sanitize(s: &str, hash: bool) -> Result<String> {
    let replaced: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    let mut sanitized = if replaced.len() < SANITIZE_MIN_LEN {
        format!("{replaced:_>SANITIZE_MIN_LEN$}")
    } else if replaced.len() > SANITIZE_MAX_LEN {
        if hash {
            let mut hasher = md5::Md5::new();
            hasher.update(replaced.as_bytes());
            hex::encode(hasher.finalize())
        } else {
            return Err(RagError::InvalidInput(format!(
                "too long string: {replaced} > {SANITIZE_MAX_LEN}"
            )));
        }
    } else {
        replaced
    };

    let bytes_len = sanitized.len();
    let mut bytes: Vec<u8> = sanitized.into_bytes();
    if !bytes[0].is_ascii_alphanumeric() {
        bytes[0] = b'x';
    }
    if bytes_len > 1 && !bytes[bytes_len - 1].is_ascii_alphanumeric() {
        bytes[bytes_len - 1] = b'x';
    }
    sanitized = String::from_utf8(bytes).expect("ASCII-only bytes remain valid UTF-8");

    Ok(sanitized)
}

/// Derives the space key for a (provider, model alias, modality) triple:
/// `sanitize(provider + "_" + model_alias + "_" + mod_tag)`.
pub fn space_key(provider: &str, model_alias: &str, modality: Modality) -> Result<String> {
    let raw = format!("{provider}_{model_alias}_{}", modality.tag());
    sanitize(&raw, true)
}

/// Deterministic temp-file path for a derived asset: `MD5(source)` plus
/// `suffix`, placed in the system temp directory. Used for PDF-extracted
/// images, transcoded audio, and split video frames so re-running the same
/// extraction yields the same path (a random name would make the metadata
/// fingerprint non-reproducible).
pub fn temp_file_path_from(source: &str, suffix: &str) -> PathBuf {
    let mut hasher = md5::Md5::new();
    hasher.update(source.as_bytes());
    let digest = hex::encode(hasher.finalize());
    std::env::temp_dir().join(format!("{digest}{suffix}"))
}

use md5::Digest as Md5DigestTrait;

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_pads_short_input() {
        let out = sanitize("ab", false).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.ends_with("ab"));
    }

    #[test]
    fn test_sanitize_replaces_disallowed_chars() {
        let out = sanitize("openai/text-embedding-3-small", false).unwrap();
        assert!(out.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn test_sanitize_boundary_invariant_holds_for_all_underscore_input() {
        let out = sanitize("___", false).unwrap();
        assert_ne!(&out[0..1], "_");
        assert_ne!(&out[out.len() - 1..], "_");
    }

    #[test]
    fn test_sanitize_too_long_without_hash_errors() {
        let long = "a".repeat(100);
        let err = sanitize(&long, false).unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[test]
    fn test_sanitize_too_long_with_hash_is_fixed_length() {
        let long = "a".repeat(100);
        let out = sanitize(&long, true).unwrap();
        assert_eq!(out.len(), 32);
    }

    #[test]
    fn test_sanitize_matches_spec_regex() {
        let re_ok = |s: &str| -> bool {
            let bytes = s.as_bytes();
            if bytes.len() < 3 || bytes.len() > 63 {
                return false;
            }
            let is_alnum = |b: u8| b.is_ascii_alphanumeric();
            let is_mid = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
            is_alnum(bytes[0])
                && is_alnum(bytes[bytes.len() - 1])
                && bytes[1..bytes.len() - 1].iter().all(|&b| is_mid(b))
        };
        for input in ["___", "a", "", "...", "text-embedding-3-small", "x"] {
            let out = sanitize(input, false).unwrap();
            assert!(re_ok(&out), "sanitize({input:?}) = {out:?} violates boundary invariant");
        }
    }

    #[test]
    fn test_space_key_changes_with_modality() {
        let text_key = space_key("openai", "te3small", Modality::Text).unwrap();
        let image_key = space_key("openai", "te3small", Modality::Image).unwrap();
        assert_ne!(text_key, image_key);
    }

    #[test]
    fn test_fingerprint_stable_and_order_independent() {
        let a = BasicMetaData {
            file_path: "/docs/a.txt".into(),
            file_size: 100,
            file_lastmod_at: "2026-01-01T00:00:00Z".into(),
            chunk_no: 2,
            ..Default::default()
        };
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_differs_on_chunk_no() {
        let mut a = BasicMetaData {
            file_path: "/docs/a.txt".into(),
            ..Default::default()
        };
        let b = BasicMetaData {
            chunk_no: 1,
            ..a.clone()
        };
        a.chunk_no = 0;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_ref_doc_id_prefers_temp_file_path() {
        let meta = BasicMetaData {
            file_path: "/docs/a.pdf".into(),
            temp_file_path: "/tmp/deadbeef.png".into(),
            ..Default::default()
        };
        assert!(meta.ref_doc_id().contains("/tmp/deadbeef.png"));
    }

    #[test]
    fn test_exts_classify() {
        assert_eq!(exts::classify("photo.JPG"), Some(Modality::Image));
        assert_eq!(exts::classify("clip.mp4"), Some(Modality::Video));
        assert_eq!(exts::classify("note.txt"), None);
    }

    #[test]
    fn test_exts_is_sitemap() {
        assert!(exts::is_sitemap("https://example.com/sitemap.xml"));
        assert!(!exts::is_sitemap("https://example.com/page.html"));
    }

    #[test]
    fn test_temp_file_path_is_deterministic() {
        let a = temp_file_path_from("https://example.com/x.png", ".png");
        let b = temp_file_path_from("https://example.com/x.png", ".png");
        assert_eq!(a, b);
    }

    #[test]
    fn test_node_new_derives_ids() {
        let meta = BasicMetaData {
            file_path: "/docs/a.txt".into(),
            chunk_no: 0,
            ..Default::default()
        };
        let node = Node::new(NodePayload::Text("hello".into()), meta);
        assert_eq!(node.modality(), Modality::Text);
        assert!(node.id.starts_with(&node.ref_doc_id));
    }
}
