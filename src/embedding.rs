//! Embedding provider boundary. The engine treats vectors as opaque beyond
//! their fixed dimension; backends are swappable behind [`Embedder`] and
//! injected at construction.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{MemoryError, Result};

const MAX_PROVIDER_ERROR_CHARS: usize = 200;

/// Converts text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Backend name.
    fn name(&self) -> &str;

    /// Embedding dimensions, fixed for the lifetime of the instance.
    fn dimensions(&self) -> usize;

    /// Embed one text. A failure is surfaced as [`MemoryError::Embedding`],
    /// never as a default or zero vector.
    async fn embed(&self, text: &str, namespace: &str) -> Result<Vec<f32>>;
}

// ── Hash-projection backend (local, deterministic) ───────────

/// Deterministic local embedder: FNV-1a seeds a splitmix64 stream that
/// fills each dimension with a unit-interval float. No network, stable
/// across runs, namespace-sensitive.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn fnv1a64(seed: u64, bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ seed;
        for &b in bytes {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }

    fn splitmix64(x: u64) -> u64 {
        let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    #[allow(clippy::cast_precision_loss)]
    fn unit_f32(x: u64) -> f32 {
        const U24_MAX: f32 = ((1u32 << 24) - 1) as f32;
        let top_u24 = (x >> 40) as u32;
        (top_u24 as f32 / U24_MAX) * 2.0 - 1.0
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str, namespace: &str) -> Result<Vec<f32>> {
        let seed = Self::fnv1a64(0, namespace.as_bytes());
        let base = Self::fnv1a64(seed, text.as_bytes());
        let mut v = Vec::with_capacity(self.dims);
        for i in 0..self.dims {
            let mixed = Self::splitmix64(base ^ (i as u64));
            v.push(Self::unit_f32(mixed));
        }
        Ok(v)
    }
}

// ── OpenAI-compatible backend ────────────────────────────────

fn is_blocked_host(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.eq_ignore_ascii_case("localhost")
        || host.eq_ignore_ascii_case("metadata.google.internal")
    {
        return true;
    }

    match host.to_ascii_lowercase().parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_blocked_ipv4(ip),
        Ok(IpAddr::V6(ip)) => is_blocked_ipv6(ip),
        Err(_) => false,
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    ip.is_loopback() || ip.is_unspecified() || ip.is_unique_local() || ip.is_unicast_link_local()
}

fn validate_base_url(raw: &str, allow_http: bool) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(MemoryError::Validation(
            "custom embedding base URL is empty".into(),
        ));
    }

    let url = reqwest::Url::parse(raw)
        .map_err(|_| MemoryError::Validation("invalid custom embedding base URL".into()))?;

    match url.scheme() {
        "https" => {}
        "http" if allow_http => {}
        _ => {
            return Err(MemoryError::Validation(
                "custom embedding base URL must use https".into(),
            ));
        }
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(MemoryError::Validation(
            "custom embedding base URL must not include userinfo".into(),
        ));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(MemoryError::Validation(
            "custom embedding base URL must not include query or fragment".into(),
        ));
    }

    let host = url
        .host_str()
        .ok_or_else(|| MemoryError::Validation("custom embedding base URL missing host".into()))?;
    if is_blocked_host(host) {
        return Err(MemoryError::Validation(
            "custom embedding base URL host is blocked".into(),
        ));
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn sanitize_provider_error(body: &str) -> String {
    if body.chars().count() <= MAX_PROVIDER_ERROR_CHARS {
        return body.to_string();
    }
    let mut end = MAX_PROVIDER_ERROR_CHARS;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Remote embedder speaking the OpenAI-compatible `/v1/embeddings` shape.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    embeddings_url: String,
    auth_header: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: &str, dims: usize) -> Self {
        let base = base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            embeddings_url: format!("{base}/v1/embeddings"),
            auth_header: format!("Bearer {api_key}"),
            model: model.to_string(),
            dims,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str, _namespace: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let resp = self
            .client
            .post(&self.embeddings_url)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!(
                "provider returned {status}: {}",
                sanitize_provider_error(&body)
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MemoryError::Embedding(format!("invalid response body: {e}")))?;

        let embedding = json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|item| item.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| MemoryError::Embedding("response missing data[0].embedding".into()))?;

        #[allow(clippy::cast_possible_truncation)]
        let vector: Vec<f32> = embedding
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if vector.len() != self.dims {
            return Err(MemoryError::Embedding(format!(
                "provider returned {} dimensions, expected {}",
                vector.len(),
                self.dims
            )));
        }

        Ok(vector)
    }
}

// ── Factory ──────────────────────────────────────────────────

/// Build the embedding backend named by the config.
///
/// Unknown backends are rejected — substituting a different provider would
/// change vector space semantics silently.
pub fn create_embedder(config: &EngineConfig, api_key: Option<&str>) -> Result<Box<dyn Embedder>> {
    match config.embedding_provider.as_str() {
        "hash" => Ok(Box::new(HashEmbedder::new(config.embedding_dimensions))),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(
            "https://api.openai.com",
            api_key.unwrap_or(""),
            &config.embedding_model,
            config.embedding_dimensions,
        ))),
        name if name.starts_with("custom:") => {
            let raw = name.strip_prefix("custom:").unwrap_or("");
            let base_url = validate_base_url(raw, cfg!(test))?;
            Ok(Box::new(OpenAiEmbedder::new(
                &base_url,
                api_key.unwrap_or(""),
                &config.embedding_model,
                config.embedding_dimensions,
            )))
        }
        other => Err(MemoryError::Validation(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}
