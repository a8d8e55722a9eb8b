//! Embedding provider implementations
//!
//! Every provider implements [`Embedder`] and follows the same lifecycle: it is
//! constructed cheaply, loaded once with [`Embedder::initialize`], and only
//! then produces vectors. Calling `embed` on a provider that has not been
//! initialized fails with [`EmbedError::NotInitialized`].

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Prefixes retrieval models put in front of queries and passages.
const ROLE_PREFIXES: [&str; 2] = ["query: ", "passage: "];

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text, in input order
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// The dimension is inferred from the first embedding and is 0 when empty.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Capability to turn text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Load the model. Safe to call repeatedly; only the first call does work.
    async fn initialize(&self) -> Result<()>;

    fn is_initialized(&self) -> bool;

    /// Generate the embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for several texts, processed sequentially in order
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Dimension of the vectors this provider produces
    fn dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// L2-normalise an f32 vector and pack it as f16. Zero vectors stay zero.
pub fn normalize_to_f16(embedding: &[f32]) -> Vec<f16> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    embedding
        .iter()
        .map(|&value| {
            if norm > 0.0 {
                f16::from_f32(value / norm)
            } else {
                f16::ZERO
            }
        })
        .collect()
}

type LoadedModel = (Arc<Mutex<TextEmbedding>>, usize);

/// FastEmbed-based embedding provider using local ONNX models
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: OnceCell<LoadedModel>,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.initialized())
            .field("dimension", &self.dimension())
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: OnceCell::new(),
        }
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    async fn load_model(config: EmbedConfig) -> Result<LoadedModel> {
        config.validate()?;

        if let Some(cache_dir) = &config.cache_dir {
            tokio::fs::create_dir_all(cache_dir).await?;
        }

        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", config.model_name());

                let mut init_options = InitOptions::new(config.model.fastembed_model())
                    .with_show_download_progress(config.show_download_progress);
                if let Some(cache_dir) = &config.cache_dir {
                    init_options = init_options.with_cache_dir(cache_dir.clone());
                }

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(EmbedError::model_init)?;

                // Measure the real output dimension
                let sample = model
                    .embed(vec!["passage: sample".to_string()], None)
                    .map_err(EmbedError::model_init)?;
                let dimension = sample
                    .first()
                    .map(|emb| emb.len())
                    .unwrap_or_else(|| config.model.dimension());

                if sample
                    .first()
                    .is_some_and(|emb| emb.iter().any(|value| !value.is_finite()))
                {
                    return Err(EmbedError::invalid_config(
                        "Model validation failed: non-finite values in embedding",
                    ));
                }

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        Ok((Arc::new(Mutex::new(model)), dimension))
    }
}

#[async_trait]
impl Embedder for FastEmbedProvider {
    async fn initialize(&self) -> Result<()> {
        let config = self.config.clone();
        self.model
            .get_or_try_init(|| Self::load_model(config))
            .await?;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.model.initialized()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_batch(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::embedding_gen("No embedding generated for text"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let (model, _) = self.model.get().ok_or(EmbedError::NotInitialized)?;

        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let chunk = chunk.to_vec();
            let model_clone = Arc::clone(model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", chunk.len());

                let mut model_guard = model_clone
                    .lock()
                    .map_err(|_| EmbedError::embedding_gen("embedding model lock poisoned"))?;
                model_guard
                    .embed(chunk, None)
                    .map_err(EmbedError::embedding_gen)
            })
            .await??;

            all_embeddings.extend(batch_embeddings.iter().map(|e| normalize_to_f16(e)));
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn dimension(&self) -> usize {
        self.model
            .get()
            .map(|(_, dimension)| *dimension)
            .unwrap_or_else(|| self.config.model.dimension())
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercase word is hashed with FNV into one of `dimension` buckets with
/// a sign taken from the hash, then the vector is L2-normalised. Texts sharing
/// words land close together, which is enough for offline use and tests.
/// Role prefixes are ignored so a query and a passage with the same words get
/// the same vector.
#[derive(Debug)]
pub struct HashEmbedder {
    dimension: usize,
    initialized: AtomicBool,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            initialized: AtomicBool::new(false),
        }
    }

    fn hash_text(&self, text: &str) -> Vec<f16> {
        let text = ROLE_PREFIXES
            .iter()
            .find_map(|prefix| text.strip_prefix(prefix))
            .unwrap_or(text);

        let mut buckets = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let mut hasher = FnvHasher::default();
            hasher.write(word.to_lowercase().as_bytes());
            let hash = hasher.finish();

            let index = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            buckets[index] += sign;
        }

        normalize_to_f16(&buckets)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn initialize(&self) -> Result<()> {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            tracing::info!("Hash embedder ready. Dimension: {}", self.dimension);
        }
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f16>> {
        if !self.is_initialized() {
            return Err(EmbedError::NotInitialized);
        }
        Ok(self.hash_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if !self.is_initialized() {
            return Err(EmbedError::NotInitialized);
        }
        Ok(EmbeddingResult::new(
            texts.iter().map(|text| self.hash_text(text)).collect(),
        ))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f16], b: &[f16]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x.to_f32() * y.to_f32()).sum()
    }

    #[test]
    fn test_embedding_result() {
        let embeddings = vec![
            vec![f16::from_f32(0.1), f16::from_f32(0.2), f16::from_f32(0.3)],
            vec![f16::from_f32(0.4), f16::from_f32(0.5), f16::from_f32(0.6)],
        ];
        let result = EmbeddingResult::new(embeddings);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 3);
        assert!(!result.is_empty());
        assert_eq!(EmbeddingResult::new(vec![]).dimension, 0);
    }

    #[test]
    fn test_normalize_to_f16() {
        let normalized = normalize_to_f16(&[3.0, 4.0]);
        assert!((normalized[0].to_f32() - 0.6).abs() < 1e-3);
        assert!((normalized[1].to_f32() - 0.8).abs() < 1e-3);

        let zero = normalize_to_f16(&[0.0, 0.0, 0.0]);
        assert!(zero.iter().all(|v| v.to_f32() == 0.0));
    }

    #[test]
    fn test_fastembed_provider_creation() {
        let provider = FastEmbedProvider::new(EmbedConfig::default());

        assert_eq!(provider.provider_name(), "fastembed");
        assert_eq!(provider.dimension(), 384);
        assert!(!provider.is_initialized());
    }

    #[tokio::test]
    async fn test_fastembed_requires_initialize() {
        let provider = FastEmbedProvider::new(EmbedConfig::default());

        let result = provider.embed("hello").await;
        assert!(matches!(result, Err(EmbedError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_hash_embedder_requires_initialize() {
        let embedder = HashEmbedder::default();

        assert!(matches!(
            embedder.embed("hello").await,
            Err(EmbedError::NotInitialized)
        ));
        assert!(matches!(
            embedder.embed_batch(&["hello".to_string()]).await,
            Err(EmbedError::NotInitialized)
        ));

        embedder.initialize().await.unwrap();
        embedder.initialize().await.unwrap();
        assert!(embedder.is_initialized());
        assert_eq!(embedder.embed("hello").await.unwrap().len(), 384);
    }

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        embedder.initialize().await.unwrap();

        let a = embedder.embed("passage: Quarterly budget review").await.unwrap();
        let b = embedder.embed("passage: Quarterly budget review").await.unwrap();
        assert_eq!(a, b);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-2);
    }

    #[tokio::test]
    async fn test_hash_embedder_ignores_role_prefix() {
        let embedder = HashEmbedder::new(128);
        embedder.initialize().await.unwrap();

        let query = embedder.embed("query: budget review").await.unwrap();
        let passage = embedder.embed("passage: Budget Review").await.unwrap();
        assert_eq!(query, passage);
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity_follows_shared_words() {
        let embedder = HashEmbedder::new(256);
        embedder.initialize().await.unwrap();

        let anchor = embedder.embed("plan the product launch").await.unwrap();
        let related = embedder.embed("product launch checklist").await.unwrap();
        let unrelated = embedder.embed("dentist appointment tuesday").await.unwrap();

        assert!(dot(&anchor, &related) > dot(&anchor, &unrelated));
    }

    #[tokio::test]
    async fn test_hash_embedder_batch_preserves_order() {
        let embedder = HashEmbedder::new(32);
        embedder.initialize().await.unwrap();

        let texts = vec!["alpha".to_string(), "beta".to_string(), "".to_string()];
        let result = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.dimension, 32);
        assert_eq!(result.embeddings[0], embedder.embed("alpha").await.unwrap());
        assert_eq!(result.embeddings[1], embedder.embed("beta").await.unwrap());
        assert!(result.embeddings[2].iter().all(|v| v.to_f32() == 0.0));
    }

    #[tokio::test]
    #[ignore] // Downloads the real model - run with: cargo test test_fastembed_real_model -- --ignored
    async fn test_fastembed_real_model() -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();

        let temp_dir = tempfile::tempdir()?;
        let provider =
            FastEmbedProvider::create(EmbedConfig::default().with_cache_dir(temp_dir.path()))
                .await?;
        assert!(provider.is_initialized());

        let texts = vec![
            "passage: Machine learning models process natural language efficiently.".to_string(),
            "passage: Deep neural networks enable semantic understanding of text.".to_string(),
            "passage: The dentist appointment moved to Tuesday.".to_string(),
        ];
        let result = provider.embed_batch(&texts).await?;
        assert_eq!(result.len(), 3);
        assert_eq!(result.dimension, provider.dimension());

        for embedding in &result.embeddings {
            assert!((dot(embedding, embedding) - 1.0).abs() < 1e-2);
        }
        assert!(
            dot(&result.embeddings[0], &result.embeddings[1])
                > dot(&result.embeddings[0], &result.embeddings[2])
        );

        Ok(())
    }
}
