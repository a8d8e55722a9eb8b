//! Error types for the search engine

use margin_embed::EmbedError;

/// Result type for search engine operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors surfaced by the keyword index, the vector store and the engine.
///
/// Failures that only affect one entity in the embedding queue or one path of
/// a hybrid query are logged and absorbed where they happen. Everything that
/// reaches a caller through this type is a storage, configuration or lifecycle
/// problem.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The embedding model is not loaded, or the engine has been shut down
    #[error("Search engine not initialized: {message}")]
    NotInitialized { message: String },

    /// The database rejected a read or write
    #[error("Search index failure: {source}")]
    IndexCorruption {
        #[from]
        source: sqlx::Error,
    },

    /// A keyword query the full-text engine could not parse
    #[error("Invalid search query: {message}")]
    QuerySyntax { message: String },

    #[error("Embedding failed: {source}")]
    Embedding {
        #[from]
        source: EmbedError,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl SearchError {
    pub fn not_initialized<S: Into<String>>(message: S) -> Self {
        Self::NotInitialized {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True when SQLite reported an FTS5 query parse failure.
    pub(crate) fn is_fts_syntax_error(error: &sqlx::Error) -> bool {
        match error {
            sqlx::Error::Database(db_error) => {
                let message = db_error.message();
                message.contains("fts5: syntax error") || message.contains("unterminated string")
            }
            _ => false,
        }
    }
}
