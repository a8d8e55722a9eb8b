//! Engine configuration
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! data_dir = "/home/me/.local/share/margin"
//! debounce_ms = 500
//!
//! [chunk]
//! max_tokens = 128
//!
//! [embedding]
//! model = "bge-small-en-v1.5"
//! ```

use crate::error::{Result, SearchError};
use margin_context::chunk::ChunkOptions;
use margin_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for [`SearchEngine`](crate::retrieval::engine::SearchEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the database file
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`
    pub database_file: String,
    /// Quiet period before a queued entity is embedded
    pub debounce_ms: u64,
    /// Chunking applied to long entity text before embedding
    pub chunk: ChunkOptions,
    /// Result limit per match type when a query does not give one
    pub default_limit: usize,
    /// Entities loaded and indexed per step of a full reindex
    pub reindex_batch_size: usize,
    /// Model used by the FastEmbed provider
    pub embedding: EmbedConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".margin"),
            database_file: "margin.db".to_string(),
            debounce_ms: 2000,
            chunk: ChunkOptions::default(),
            default_limit: 5,
            reindex_batch_size: 50,
            embedding: EmbedConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load a configuration from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents).map_err(|e| {
            SearchError::config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_data_dir<P: AsRef<Path>>(mut self, data_dir: P) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    pub fn with_chunk_options(mut self, chunk: ChunkOptions) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn with_default_limit(mut self, default_limit: usize) -> Self {
        self.default_limit = default_limit;
        self
    }

    pub fn with_reindex_batch_size(mut self, reindex_batch_size: usize) -> Self {
        self.reindex_batch_size = reindex_batch_size;
        self
    }

    pub fn with_embedding(mut self, embedding: EmbedConfig) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_file.trim().is_empty() {
            return Err(SearchError::config("database_file must not be empty"));
        }
        if self.reindex_batch_size == 0 {
            return Err(SearchError::config("reindex_batch_size must be at least 1"));
        }
        if self.chunk.max_tokens == 0 {
            return Err(SearchError::config("chunk.max_tokens must be at least 1"));
        }
        if self.chunk.overlap_tokens >= self.chunk.max_tokens {
            return Err(SearchError::config(
                "chunk.overlap_tokens must be smaller than chunk.max_tokens",
            ));
        }
        self.embedding
            .validate()
            .map_err(|e| SearchError::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(2000));
        assert_eq!(config.default_limit, 5);
        assert_eq!(config.reindex_batch_size, 50);
        assert_eq!(config.chunk, ChunkOptions::default());
        assert_eq!(config.database_path(), PathBuf::from(".margin/margin.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::new("/tmp/margin")
            .with_debounce_ms(10)
            .with_default_limit(3)
            .with_reindex_batch_size(7)
            .with_chunk_options(ChunkOptions::new(64, 8, 20));

        assert_eq!(config.database_path(), PathBuf::from("/tmp/margin/margin.db"));
        assert_eq!(config.debounce_ms, 10);
        assert_eq!(config.default_limit, 3);
        assert_eq!(config.reindex_batch_size, 7);
        assert_eq!(config.chunk.max_tokens, 64);
    }

    #[test]
    fn test_from_toml_file_keeps_defaults() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("margin.toml");
        std::fs::write(
            &path,
            "debounce_ms = 250\n\n[chunk]\nmax_tokens = 128\n\n[embedding]\nmodel = \"bge-small-en-v1.5\"\n",
        )?;

        let config = EngineConfig::from_toml_file(&path)?;
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.chunk.max_tokens, 128);
        assert_eq!(config.chunk.overlap_tokens, 32);
        assert_eq!(config.embedding.model_name(), "bge-small-en-v1.5");
        assert_eq!(config.default_limit, 5);
        Ok(())
    }

    #[test]
    fn test_invalid_toml_is_config_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("margin.toml");
        std::fs::write(&path, "debounce_ms = \"soon\"")?;

        assert!(matches!(
            EngineConfig::from_toml_file(&path),
            Err(SearchError::Config { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(EngineConfig::default().with_reindex_batch_size(0).validate().is_err());
        assert!(
            EngineConfig::default()
                .with_chunk_options(ChunkOptions::new(16, 16, 10))
                .validate()
                .is_err()
        );
    }
}
