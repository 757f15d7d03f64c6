//! Two-tier response cache: exact-match and semantic-similarity lookup of
//! prior responses, scoped per user/provider/model.
//!
//! Exact entries are keyed by a normalized-prompt hash; semantic entries
//! additionally carry an embedding compared by cosine similarity. TTL
//! expiry is lazy (checked on read); `purge_expired` offers an optional
//! sweep. Reads never block writes for unrelated keys.

mod embedding;
mod normalize;
mod similarity;

pub use embedding::{EmbeddingProvider, EmbeddingRetry, ExponentialBackoff, HashEmbedder};
pub use normalize::{normalize_prompt, prompt_hash};
pub use similarity::cosine_similarity;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::ModelKey;

use embedding::embed_with_retry;

#[derive(Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub similarity_threshold: f32,
    pub retry: EmbeddingRetry,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            similarity_threshold: 0.85,
            retry: EmbeddingRetry::default(),
        }
    }
}

/// Cache entries are scoped per user and serving model; responses from
/// different models are never interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheScope {
    pub user_id: String,
    pub model: ModelKey,
}

impl CacheScope {
    pub fn new(user_id: impl Into<String>, model: ModelKey) -> Self {
        Self {
            user_id: user_id.into(),
            model,
        }
    }
}

/// Per-lookup options with documented defaults: semantic matching on, the
/// configured similarity threshold, the configured TTL.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub enable_semantic: bool,
    pub similarity_threshold: Option<f32>,
    pub ttl: Option<Duration>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self {
            enable_semantic: true,
            similarity_threshold: None,
            ttl: None,
        }
    }

    /// Restricts matching to exact lookups. Storage still happens.
    pub fn exact_only() -> Self {
        Self {
            enable_semantic: false,
            similarity_threshold: None,
            ttl: None,
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    Exact,
    Semantic,
}

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub value: String,
    pub strategy: CacheStrategy,
    /// Matched cosine similarity; only present for semantic hits.
    pub similarity: Option<f32>,
}

/// Scope filter for administrative removal. `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct CacheFilter {
    pub user_id: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl CacheFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    fn matches(&self, scope: &CacheScope) -> bool {
        self.user_id.as_deref().is_none_or(|u| u == scope.user_id)
            && self
                .provider
                .as_deref()
                .is_none_or(|p| p == scope.model.provider)
            && self.model.as_deref().is_none_or(|m| m == scope.model.model)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[derive(Debug, Clone)]
struct ExactEntry {
    value: String,
    stored_at: Instant,
    ttl: Duration,
}

impl ExactEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

#[derive(Debug, Clone)]
struct SemanticEntry {
    prompt_hash: String,
    value: String,
    embedding: Vec<f32>,
    stored_at: Instant,
    ttl: Duration,
}

impl SemanticEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

pub struct ResponseCache {
    config: CacheConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    exact: DashMap<(CacheScope, String), ExactEntry>,
    semantic: DashMap<CacheScope, RwLock<Vec<SemanticEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// A cache without an embedding provider only ever matches exactly.
    pub fn new(config: CacheConfig, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            config,
            embedder,
            exact: DashMap::new(),
            semantic: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Exact lookup first; on miss, semantic comparison against the
    /// scope's stored embeddings when enabled. Embedding failures degrade
    /// to exact-only and are logged, never surfaced.
    pub async fn check(
        &self,
        prompt: &str,
        scope: &CacheScope,
        options: &CacheOptions,
    ) -> Option<CacheHit> {
        let normalized = normalize_prompt(prompt);
        let hash = prompt_hash(&normalized);
        let key = (scope.clone(), hash);

        let mut expired = false;
        if let Some(entry) = self.exact.get(&key) {
            if entry.is_expired() {
                expired = true;
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(user_id = %scope.user_id, model = %scope.model, "exact cache hit");
                return Some(CacheHit {
                    value: entry.value.clone(),
                    strategy: CacheStrategy::Exact,
                    similarity: None,
                });
            }
        }
        if expired {
            self.exact.remove(&key);
        }

        if options.enable_semantic
            && let Some(embedder) = &self.embedder
        {
            match embed_with_retry(embedder.as_ref(), &normalized, &self.config.retry).await {
                Ok(query) => {
                    if let Some(hit) = self.best_semantic_match(scope, &query, options) {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Some(hit);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "embedding unavailable, degrading to exact-only lookup"
                    );
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Always writes the exact entry; with semantic enabled also stores
    /// the prompt embedding so future lookups can match paraphrases.
    /// Re-storing the same prompt overwrites. Embedding failure degrades
    /// to exact-only storage.
    pub async fn store(
        &self,
        prompt: &str,
        value: impl Into<String>,
        scope: &CacheScope,
        options: &CacheOptions,
    ) {
        let value = value.into();
        let normalized = normalize_prompt(prompt);
        let hash = prompt_hash(&normalized);
        let ttl = options.ttl.unwrap_or(self.config.default_ttl);

        self.exact.insert(
            (scope.clone(), hash.clone()),
            ExactEntry {
                value: value.clone(),
                stored_at: Instant::now(),
                ttl,
            },
        );

        if options.enable_semantic
            && let Some(embedder) = &self.embedder
        {
            match embed_with_retry(embedder.as_ref(), &normalized, &self.config.retry).await {
                Ok(vector) => {
                    let slot = self.semantic.entry(scope.clone()).or_default();
                    let mut entries = slot.write().unwrap_or_else(|e| e.into_inner());
                    entries.retain(|e| !e.is_expired() && e.prompt_hash != hash);
                    entries.push(SemanticEntry {
                        prompt_hash: hash,
                        value,
                        embedding: vector,
                        stored_at: Instant::now(),
                        ttl,
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "embedding unavailable, stored exact entry only");
                }
            }
        }
    }

    /// Removes every entry matching the filter. Administrative/test
    /// utility.
    pub fn clear(&self, filter: &CacheFilter) {
        self.exact.retain(|(scope, _), _| !filter.matches(scope));
        self.semantic.retain(|scope, _| !filter.matches(scope));
    }

    /// Optional sweep reclaiming space held by expired entries; expiry
    /// itself is already enforced lazily on read.
    pub fn purge_expired(&self) {
        self.exact.retain(|_, entry| !entry.is_expired());
        self.semantic.retain(|_, slot| {
            let mut entries = slot.write().unwrap_or_else(|e| e.into_inner());
            entries.retain(|e| !e.is_expired());
            !entries.is_empty()
        });
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn exact_len(&self) -> usize {
        self.exact.len()
    }

    fn best_semantic_match(
        &self,
        scope: &CacheScope,
        query: &[f32],
        options: &CacheOptions,
    ) -> Option<CacheHit> {
        let threshold = options
            .similarity_threshold
            .unwrap_or(self.config.similarity_threshold);

        let slot = self.semantic.get(scope)?;
        let entries = slot.read().unwrap_or_else(|e| e.into_inner());

        let mut best: Option<(f32, &SemanticEntry)> = None;
        for entry in entries.iter().filter(|e| !e.is_expired()) {
            let score = cosine_similarity(query, &entry.embedding);
            if best.is_none_or(|(top, _)| score > top) {
                best = Some((score, entry));
            }
        }

        let (score, entry) = best?;
        if score < threshold {
            return None;
        }

        tracing::debug!(
            user_id = %scope.user_id,
            model = %scope.model,
            similarity = score,
            "semantic cache hit"
        );
        Some(CacheHit {
            value: entry.value.clone(),
            strategy: CacheStrategy::Semantic,
            similarity: Some(score),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> CacheScope {
        CacheScope::new("user-1", ModelKey::new("openai", "gpt-4"))
    }

    fn exact_cache() -> ResponseCache {
        ResponseCache::new(CacheConfig::default(), None)
    }

    fn semantic_cache() -> ResponseCache {
        ResponseCache::new(CacheConfig::default(), Some(Arc::new(HashEmbedder::default())))
    }

    #[tokio::test]
    async fn test_exact_hit() {
        let cache = exact_cache();
        let options = CacheOptions::exact_only();

        cache.store("Weather in NYC?", "sunny", &scope(), &options).await;
        let hit = cache.check("weather in nyc", &scope(), &options).await.unwrap();
        assert_eq!(hit.strategy, CacheStrategy::Exact);
        assert_eq!(hit.value, "sunny");
        assert!(hit.similarity.is_none());
    }

    #[tokio::test]
    async fn test_exact_only_misses_on_different_prompt() {
        let cache = semantic_cache();
        let options = CacheOptions::exact_only();

        cache
            .store("weather in new york", "sunny", &scope(), &options)
            .await;
        // Semantically close, but matching is restricted to exact.
        let result = cache.check("weather in nyc", &scope(), &options).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_semantic_match_tolerates_paraphrase() {
        let cache = semantic_cache();
        let options = CacheOptions::new().with_similarity_threshold(0.5);

        cache
            .store("what is the weather in new york", "sunny", &scope(), &options)
            .await;
        let hit = cache
            .check("what is the weather in nyc", &scope(), &options)
            .await
            .unwrap();
        assert_eq!(hit.strategy, CacheStrategy::Semantic);
        assert_eq!(hit.value, "sunny");
        assert!(hit.similarity.unwrap() >= 0.5);
    }

    #[tokio::test]
    async fn test_semantic_threshold_rejects_unrelated() {
        let cache = semantic_cache();
        let options = CacheOptions::new().with_similarity_threshold(0.85);

        cache
            .store("weather in new york", "sunny", &scope(), &options)
            .await;
        let result = cache
            .check("chocolate cake recipe", &scope(), &options)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let cache = exact_cache();
        let options = CacheOptions::exact_only();
        let other_user = CacheScope::new("user-2", ModelKey::new("openai", "gpt-4"));
        let other_model = CacheScope::new("user-1", ModelKey::new("openai", "gpt-3.5"));

        cache.store("prompt", "answer", &scope(), &options).await;
        assert!(cache.check("prompt", &other_user, &options).await.is_none());
        assert!(cache.check("prompt", &other_model, &options).await.is_none());
        assert!(cache.check("prompt", &scope(), &options).await.is_some());
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy() {
        let cache = exact_cache();
        let options = CacheOptions::exact_only().with_ttl(Duration::from_millis(10));

        cache.store("prompt", "answer", &scope(), &options).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.check("prompt", &scope(), &options).await.is_none());
        // The expired entry was reaped by the read.
        assert_eq!(cache.exact_len(), 0);
    }

    #[tokio::test]
    async fn test_restore_overwrites() {
        let cache = exact_cache();
        let options = CacheOptions::exact_only();

        cache.store("prompt", "old", &scope(), &options).await;
        cache.store("prompt", "new", &scope(), &options).await;
        let hit = cache.check("prompt", &scope(), &options).await.unwrap();
        assert_eq!(hit.value, "new");
    }

    #[tokio::test]
    async fn test_clear_by_user() {
        let cache = exact_cache();
        let options = CacheOptions::exact_only();
        let other = CacheScope::new("user-2", ModelKey::new("openai", "gpt-4"));

        cache.store("prompt", "a", &scope(), &options).await;
        cache.store("prompt", "b", &other, &options).await;

        cache.clear(&CacheFilter::for_user("user-1"));
        assert!(cache.check("prompt", &scope(), &options).await.is_none());
        assert!(cache.check("prompt", &other, &options).await.is_some());
    }

    #[tokio::test]
    async fn test_purge_expired_sweeps() {
        let cache = semantic_cache();
        let options = CacheOptions::new().with_ttl(Duration::from_millis(5));

        cache.store("prompt one", "a", &scope(), &options).await;
        cache.store("prompt two", "b", &scope(), &options).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        cache.purge_expired();
        assert_eq!(cache.exact_len(), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_gracefully() {
        use async_trait::async_trait;

        struct Broken;

        #[async_trait]
        impl EmbeddingProvider for Broken {
            async fn embed(&self, _text: &str) -> crate::Result<Vec<f32>> {
                Err(crate::Error::EmbeddingUnavailable("offline".into()))
            }
        }

        let config = CacheConfig {
            retry: EmbeddingRetry {
                max_retries: 0,
                ..EmbeddingRetry::default()
            },
            ..CacheConfig::default()
        };
        let cache = ResponseCache::new(config, Some(Arc::new(Broken)));
        let options = CacheOptions::new();

        // Store degrades to exact-only; check still finds the exact entry.
        cache.store("prompt", "answer", &scope(), &options).await;
        let hit = cache.check("prompt", &scope(), &options).await.unwrap();
        assert_eq!(hit.strategy, CacheStrategy::Exact);

        // A semantically-similar lookup silently misses instead of erroring.
        assert!(cache.check("other prompt", &scope(), &options).await.is_none());
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = exact_cache();
        let options = CacheOptions::exact_only();

        cache.store("prompt", "answer", &scope(), &options).await;
        cache.check("prompt", &scope(), &options).await;
        cache.check("unknown", &scope(), &options).await;

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
