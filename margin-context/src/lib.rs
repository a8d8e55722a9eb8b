//! Pure text processing for the margin search engine: entity snapshots,
//! markup stripping and boundary-aware chunking.

pub mod chunk;
pub mod entity;
pub mod extract;

pub use chunk::{ChunkOptions, chunk};
pub use entity::{Entity, EntityRow, EntityType};
pub use extract::{
    CHUNK_THRESHOLD, ExtractedContent, content_hash, embeddable_text, extract,
    prepare_for_embedding, preview, should_chunk, strip_markup,
};
