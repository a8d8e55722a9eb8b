//! # margin-embed
//!
//! Text embeddings for the margin search engine. Providers sit behind the
//! [`Embedder`] trait so the engine can run against a local ONNX model via
//! FastEmbed in production and a deterministic hashing model in tests or
//! fully offline setups.
//!
//! ## Quick Start
//!
//! ```no_run
//! use margin_embed::{EmbedConfig, Embedder, FastEmbedProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = FastEmbedProvider::new(EmbedConfig::default());
//! provider.initialize().await?;
//!
//! let vector = provider.embed("passage: Quarterly budget review").await?;
//! assert_eq!(vector.len(), provider.dimension());
//! # Ok(())
//! # }
//! ```
//!
//! ## Memory Usage
//!
//! Embeddings are L2-normalised and returned as half-precision (f16) values,
//! which is also how the vector store persists them.

pub mod config;
pub mod error;
pub mod provider;

// Re-export main types for easy access
pub use config::{EmbedConfig, EmbedModel};
pub use error::{EmbedError, Result};
pub use provider::{Embedder, EmbeddingResult, FastEmbedProvider, HashEmbedder, normalize_to_f16};
