//! Embedding-provider boundary with bounded retry.
//!
//! Embeddings come from an external provider the cache treats as a black
//! box. Generation is retried with exponential backoff a bounded number of
//! times; after that the cache degrades to exact-only matching.

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            jitter: 0.1,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base =
            self.initial.as_millis() as f64 * self.factor.powi(attempt.saturating_sub(1) as i32);
        let clamped = base.min(self.max.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            let jitter_range = clamped * self.jitter;
            let jitter_offset = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
            (clamped + jitter_offset).max(0.0)
        } else {
            clamped
        };

        Duration::from_millis(jittered as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(2),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingRetry {
    pub max_retries: u32,
    pub backoff: ExponentialBackoff,
}

impl Default for EmbeddingRetry {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: ExponentialBackoff::default(),
        }
    }
}

pub(crate) async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    text: &str,
    retry: &EmbeddingRetry,
) -> Result<Vec<f32>> {
    let mut attempt = 0;
    loop {
        match provider.embed(text).await {
            Ok(vector) => return Ok(vector),
            Err(err) => {
                attempt += 1;
                if attempt > retry.max_retries {
                    return Err(err);
                }
                let delay = retry.backoff.delay_for(attempt);
                tracing::debug!(attempt, ?delay, error = %err, "retrying embedding generation");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Deterministic bag-of-tokens embedder for tests and offline use: each
/// whitespace token hashes into a bucket, the vector is L2-normalized.
/// Paraphrases sharing tokens score high cosine similarity; unrelated text
/// scores near zero.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::similarity::cosine_similarity;

    #[test]
    fn test_backoff_growth() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 2.0)
                .with_jitter(0.0);

        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_clamps_at_max() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500), 2.0)
                .with_jitter(0.0);
        assert_eq!(backoff.delay_for(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("weather in new york").await.unwrap();
        let b = embedder.embed("weather in new york").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hash_embedder_paraphrase_overlap() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("weather in new york").await.unwrap();
        let b = embedder.embed("weather in nyc").await.unwrap();
        let c = embedder.embed("chocolate cake recipe").await.unwrap();

        let near = cosine_similarity(&a, &b);
        let far = cosine_similarity(&a, &c);
        assert!(near > far);
        assert!(near > 0.4);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        struct AlwaysFails;

        #[async_trait]
        impl EmbeddingProvider for AlwaysFails {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Err(crate::Error::EmbeddingUnavailable("boom".into()))
            }
        }

        let retry = EmbeddingRetry {
            max_retries: 1,
            backoff: ExponentialBackoff::new(
                Duration::from_millis(1),
                Duration::from_millis(1),
                1.0,
            )
            .with_jitter(0.0),
        };

        let result = embed_with_retry(&AlwaysFails, "text", &retry).await;
        assert!(matches!(result, Err(crate::Error::EmbeddingUnavailable(_))));
    }

    #[tokio::test]
    async fn test_retry_recovers_on_second_attempt() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct FailsOnce {
            calls: AtomicU32,
        }

        #[async_trait]
        impl EmbeddingProvider for FailsOnce {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(crate::Error::EmbeddingUnavailable("transient".into()))
                } else {
                    Ok(vec![1.0])
                }
            }
        }

        let provider = FailsOnce {
            calls: AtomicU32::new(0),
        };
        let retry = EmbeddingRetry {
            max_retries: 2,
            backoff: ExponentialBackoff::new(
                Duration::from_millis(1),
                Duration::from_millis(1),
                1.0,
            )
            .with_jitter(0.0),
        };

        let vector = embed_with_retry(&provider, "text", &retry).await.unwrap();
        assert_eq!(vector, vec![1.0]);
    }
}
