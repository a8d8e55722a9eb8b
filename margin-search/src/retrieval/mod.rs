pub mod embedding_queue;
pub mod engine;
pub mod hybrid;
