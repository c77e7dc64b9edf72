//! Embedding half of the `Chunk`/`ChunkEmbedding` pair (spec.md §4.4),
//! split into its own file the way the teacher splits `text_chunk.rs` from
//! `text_chunk_embedding.rs` — each file invokes `stored_object!` exactly
//! once.

use surrealdb::RecordId;

use crate::stored_object;

stored_object!(ChunkEmbedding, "chunk_embedding", {
    chunk_id: RecordId,
    source_id: String,
    embedding: Vec<f32>,
    dimension: u32,
    model: String
});
