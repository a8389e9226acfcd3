//! Web readers: a default HTML reader with asset crawl, a Wikipedia
//! specialization, and sitemap enumeration. All HTTP access goes through a
//! single rate-limited client per crawl so a page fetch followed by N asset
//! fetches never exceeds `req_per_sec`.

use super::Document;
use crate::config::IngestConfig;
use crate::error::{RagError, Result};
use crate::model::exts;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(req_per_sec: u32) -> Self {
        let req_per_sec = req_per_sec.max(1);
        Self {
            min_interval: Duration::from_secs_f64(1.0 / req_per_sec as f64),
            last: Mutex::new(None),
        }
    }

    async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn build_client(cfg: &IngestConfig) -> Result<Client> {
    Client::builder()
        .user_agent(cfg.user_agent.clone())
        .timeout(Duration::from_secs(cfg.timeout_sec))
        .build()
        .map_err(|e| RagError::Reader(format!("failed to build HTTP client: {e}")))
}

fn same_origin(a: &str, b: &str) -> bool {
    let (Ok(a), Ok(b)) = (url::Url::parse(a), url::Url::parse(b)) else {
        return false;
    };
    a.host_str() == b.host_str()
}

fn resolve(base: &str, maybe_relative: &str) -> Option<String> {
    let base = url::Url::parse(base).ok()?;
    base.join(maybe_relative).ok().map(|u| u.to_string())
}

/// Scans raw HTML for `<img src>`, `<a href>`, and `<source srcset>` asset
/// references whose extension is one of the multimodal sets, resolved
/// against `page_url`.
fn find_asset_urls(html: &str, page_url: &str) -> Vec<String> {
    let fetch_target: Vec<&str> = exts::IMAGE.iter().chain(exts::AUDIO).chain(exts::VIDEO).copied().collect();
    let mut found = Vec::new();
    for attr in ["src=", "href=", "srcset="] {
        let mut from = 0usize;
        while let Some(rel) = html[from..].find(attr) {
            let start = from + rel + attr.len();
            from = start;
            let Some(quote) = html[start..].chars().next() else { break };
            if quote != '"' && quote != '\'' {
                continue;
            }
            let Some(end_rel) = html[start + 1..].find(quote) else { break };
            let raw_value = &html[start + 1..start + 1 + end_rel];
            // srcset can hold a comma-separated list; take the first URL token.
            let value = raw_value.split(',').next().unwrap_or(raw_value).split_whitespace().next().unwrap_or("");
            if value.is_empty() {
                continue;
            }
            let ext = exts::get_ext(value);
            if fetch_target.contains(&ext.as_str()) {
                if let Some(abs) = resolve(page_url, value) {
                    found.push(abs);
                }
            }
        }
    }
    found
}

/// Removes `<script>`/`<style>` element bodies, strips remaining tags, and
/// decodes a handful of common entities. Not a spec-compliant HTML parser —
/// sufficient to pull readable body text out of typical pages.
fn strip_html_tags(html: &str) -> String {
    let mut cleaned = html.to_string();
    for (open, close) in [("<script", "</script>"), ("<style", "</style>")] {
        loop {
            let Some(start) = cleaned.to_ascii_lowercase().find(open) else { break };
            let lower = cleaned.to_ascii_lowercase();
            let Some(end_rel) = lower[start..].find(close) else { break };
            let end = start + end_rel + close.len();
            cleaned.replace_range(start..end, " ");
        }
    }

    let mut out = String::with_capacity(cleaned.len());
    let mut in_tag = false;
    for c in cleaned.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    let decoded = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Wikipedia specialization: the body markup is standard MediaWiki HTML;
/// narrow to the `mw-content-text` container before stripping tags so
/// navigation chrome and sidebars are excluded.
fn extract_wikipedia_text(html: &str) -> String {
    if let Some(start) = html.find(r#"id="mw-content-text""#) {
        if let Some(tail) = html[start..].find('>') {
            let body_start = start + tail + 1;
            if let Some(rel_end) = html[body_start..].find(r#"id="catlinks""#) {
                return strip_html_tags(&html[body_start..body_start + rel_end]);
            }
            return strip_html_tags(&html[body_start..]);
        }
    }
    strip_html_tags(html)
}

async fn fetch_asset(
    client: &Client,
    asset_url: &str,
    cfg: &IngestConfig,
    limiter: &RateLimiter,
) -> Result<Option<Document>> {
    limiter.acquire().await;
    let resp = client
        .get(asset_url)
        .send()
        .await
        .map_err(|e| RagError::Reader(format!("asset fetch failed {asset_url}: {e}")))?;
    if !resp.status().is_success() {
        return Ok(None);
    }
    if let Some(ct) = resp.headers().get(reqwest::header::CONTENT_TYPE) {
        if ct.to_str().unwrap_or("").starts_with("text/html") {
            return Ok(None);
        }
    }
    if let Some(len) = resp.content_length() {
        if len > cfg.max_asset_bytes {
            log::warn!("web reader: skipping oversized asset {asset_url} ({len} bytes)");
            return Ok(None);
        }
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| RagError::Reader(format!("asset read failed {asset_url}: {e}")))?;
    if bytes.len() as u64 > cfg.max_asset_bytes {
        log::warn!("web reader: skipping oversized asset {asset_url} ({} bytes)", bytes.len());
        return Ok(None);
    }
    let ext = exts::get_ext(asset_url);
    let temp_path = crate::model::temp_file_path_from(asset_url, &ext);
    std::fs::write(&temp_path, &bytes)
        .map_err(|e| RagError::Reader(format!("failed to persist asset {asset_url}: {e}")))?;
    Ok(Some(Document::media_temp(temp_path.to_string_lossy().into_owned(), asset_url.to_string())))
}

async fn read_html_page(url_str: &str, cfg: &IngestConfig, client: &Client, limiter: &RateLimiter) -> Result<Vec<Document>> {
    limiter.acquire().await;
    let resp = client
        .get(url_str)
        .send()
        .await
        .map_err(|e| RagError::Reader(format!("failed to fetch {url_str}: {e}")))?;
    let body = resp
        .text()
        .await
        .map_err(|e| RagError::Reader(format!("failed to read body of {url_str}: {e}")))?;

    let is_wikipedia = url_str.contains("wikipedia.org");
    let text = if is_wikipedia {
        extract_wikipedia_text(&body)
    } else {
        strip_html_tags(&body)
    };

    let mut docs = vec![Document {
        content: Some(text),
        url: url_str.to_string(),
        base_source: url_str.to_string(),
        file_type: "html".to_string(),
        ..Default::default()
    }];

    if cfg.load_asset {
        let mut seen = HashSet::new();
        for asset_url in find_asset_urls(&body, url_str) {
            if !seen.insert(asset_url.clone()) {
                continue;
            }
            if cfg.same_origin && !same_origin(url_str, &asset_url) {
                continue;
            }
            match fetch_asset(client, &asset_url, cfg, limiter).await {
                Ok(Some(doc)) => docs.push(doc),
                Ok(None) => {}
                Err(e) => log::warn!("web reader: {e}"),
            }
        }
    }

    Ok(docs)
}

async fn read_sitemap(url_str: &str, cfg: &IngestConfig) -> Result<Vec<Document>> {
    let client = build_client(cfg)?;
    let limiter = RateLimiter::new(cfg.req_per_sec);
    limiter.acquire().await;
    let resp = client
        .get(url_str)
        .send()
        .await
        .map_err(|e| RagError::Reader(format!("failed to fetch sitemap {url_str}: {e}")))?;
    let body = resp
        .text()
        .await
        .map_err(|e| RagError::Reader(format!("failed to read sitemap {url_str}: {e}")))?;

    let mut docs = Vec::new();
    let mut from = 0usize;
    while let Some(rel) = body[from..].find("<loc>") {
        let start = from + rel + "<loc>".len();
        let Some(end_rel) = body[start..].find("</loc>") else { break };
        let loc = body[start..start + end_rel].trim().to_string();
        from = start + end_rel;
        if exts::is_sitemap(&loc) {
            continue; // nested sitemap indexes aren't recursed in the minimal reader
        }
        match read_html_page(&loc, cfg, &client, &limiter).await {
            Ok(mut page_docs) => docs.append(&mut page_docs),
            Err(e) => log::warn!("web reader: sitemap entry {loc} failed: {e}"),
        }
    }
    Ok(docs)
}

pub async fn read_url(url_str: &str, cfg: &IngestConfig) -> Result<Vec<Document>> {
    if exts::is_sitemap(url_str) {
        return read_sitemap(url_str, cfg).await;
    }
    let client = build_client(cfg)?;
    let limiter = RateLimiter::new(cfg.req_per_sec);
    read_html_page(url_str, cfg, &client, &limiter).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_tags_removes_script_and_tags() {
        let html = "<html><head><script>var x=1;</script></head><body><p>Hello &amp; world</p></body></html>";
        let text = strip_html_tags(html);
        assert_eq!(text, "Hello & world");
    }

    #[test]
    fn test_find_asset_urls_resolves_relative_image() {
        let html = r#"<img src="/static/a.png"> <a href="doc.pdf">doc</a>"#;
        let urls = find_asset_urls(html, "https://example.com/page");
        assert_eq!(urls, vec!["https://example.com/static/a.png".to_string()]);
    }

    #[test]
    fn test_same_origin() {
        assert!(same_origin("https://example.com/a", "https://example.com/b"));
        assert!(!same_origin("https://example.com/a", "https://other.com/b"));
    }

    #[test]
    fn test_extract_wikipedia_text_narrows_to_content() {
        let html = r#"<div id="mw-content-text"><p>Body text</p></div><div id="catlinks">Categories</div>"#;
        let text = extract_wikipedia_text(html);
        assert_eq!(text, "Body text");
    }
}
