//! Configuration for embedding models

use crate::error::{EmbedError, Result};
use fastembed::EmbeddingModel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Local ONNX models the FastEmbed provider knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmbedModel {
    /// Multilingual E5 small. Expects `query: ` / `passage: ` prefixes.
    #[default]
    #[serde(rename = "multilingual-e5-small")]
    MultilingualE5Small,
    /// Multilingual E5 base. Expects `query: ` / `passage: ` prefixes.
    #[serde(rename = "multilingual-e5-base")]
    MultilingualE5Base,
    #[serde(rename = "all-minilm-l6-v2")]
    AllMiniLmL6V2,
    #[serde(rename = "bge-small-en-v1.5")]
    BgeSmallEnV15,
}

impl EmbedModel {
    pub fn name(&self) -> &'static str {
        match self {
            EmbedModel::MultilingualE5Small => "multilingual-e5-small",
            EmbedModel::MultilingualE5Base => "multilingual-e5-base",
            EmbedModel::AllMiniLmL6V2 => "all-minilm-l6-v2",
            EmbedModel::BgeSmallEnV15 => "bge-small-en-v1.5",
        }
    }

    /// Output dimension published for the model.
    pub fn dimension(&self) -> usize {
        match self {
            EmbedModel::MultilingualE5Small => 384,
            EmbedModel::MultilingualE5Base => 768,
            EmbedModel::AllMiniLmL6V2 => 384,
            EmbedModel::BgeSmallEnV15 => 384,
        }
    }

    pub(crate) fn fastembed_model(&self) -> EmbeddingModel {
        match self {
            EmbedModel::MultilingualE5Small => EmbeddingModel::MultilingualE5Small,
            EmbedModel::MultilingualE5Base => EmbeddingModel::MultilingualE5Base,
            EmbedModel::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
            EmbedModel::BgeSmallEnV15 => EmbeddingModel::BGESmallENV15,
        }
    }
}

impl fmt::Display for EmbedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EmbedModel {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "multilingual-e5-small" => Ok(EmbedModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(EmbedModel::MultilingualE5Base),
            "all-minilm-l6-v2" => Ok(EmbedModel::AllMiniLmL6V2),
            "bge-small-en-v1.5" => Ok(EmbedModel::BgeSmallEnV15),
            other => Err(EmbedError::invalid_config(format!(
                "Unknown embedding model: '{other}'"
            ))),
        }
    }
}

/// Configuration for the FastEmbed-backed provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Model to load
    pub model: EmbedModel,
    /// Directory the model files are downloaded to and loaded from.
    /// `None` lets fastembed pick its own cache location.
    pub cache_dir: Option<PathBuf>,
    /// Number of texts handed to the model per call. The default of 1 embeds
    /// inputs one at a time so peak memory stays at a single text; raise it
    /// only when throughput matters more than memory.
    pub batch_size: usize,
    /// Show a progress bar while model files download
    pub show_download_progress: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model: EmbedModel::default(),
            cache_dir: None,
            batch_size: 1,
            show_download_progress: false,
        }
    }
}

impl EmbedConfig {
    pub fn new(model: EmbedModel) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    /// Set the model cache directory (builder style)
    pub fn with_cache_dir<P: AsRef<Path>>(self, cache_dir: P) -> Self {
        Self {
            cache_dir: Some(cache_dir.as_ref().to_path_buf()),
            ..self
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn with_show_download_progress(self, show_download_progress: bool) -> Self {
        Self {
            show_download_progress,
            ..self
        }
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be at least 1"));
        }
        Ok(())
    }
}
