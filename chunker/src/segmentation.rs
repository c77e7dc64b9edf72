//! Semantic-unit packing (spec.md §4.2 steps 2-3): pack headings,
//! paragraphs, and code blocks greedily into chunks bounded by a soft
//! token band, with overlap between adjacent chunks, never splitting a
//! code block. Grounded in the teacher's `prepare_chunks` (now-removed
//! `ingestion-pipeline/src/pipeline/services.rs`), which already wires
//! `text-splitter`'s markdown splitter to a `tokenizers::Tokenizer` sizer;
//! this crate keeps that wiring and switches the flat splitter for the
//! markdown-aware one so fenced code blocks are never split.

use std::sync::OnceLock;

use common::error::AppError;
use text_splitter::{ChunkCapacity, ChunkConfig, MarkdownSplitter};
use tokenizers::Tokenizer;

use crate::ChunkerConfig;

fn tokenizer() -> Result<&'static Tokenizer, AppError> {
    static TOKENIZER: OnceLock<Result<Tokenizer, String>> = OnceLock::new();

    match TOKENIZER.get_or_init(|| {
        Tokenizer::from_pretrained("bert-base-cased", None)
            .map_err(|e| format!("failed to initialize tokenizer: {e}"))
    }) {
        Ok(tokenizer) => Ok(tokenizer),
        Err(err) => Err(AppError::InternalError(err.clone())),
    }
}

/// Splits `text` into ordered chunk strings honoring `config`'s token band
/// and overlap window. The final chunk may fall short of `min_tokens`
/// (spec.md §4.2 step 3); all others lie within `[min_tokens, max_tokens]`.
pub fn split(text: &str, config: &ChunkerConfig) -> Result<Vec<String>, AppError> {
    if config.min_tokens == 0 || config.max_tokens == 0 || config.min_tokens > config.max_tokens {
        return Err(AppError::Validation(
            "invalid chunk token bounds; ensure 0 < min <= max".into(),
        ));
    }
    if config.overlap_tokens >= config.min_tokens {
        return Err(AppError::Validation(format!(
            "overlap_tokens ({}) must be smaller than min_tokens ({})",
            config.overlap_tokens, config.min_tokens
        )));
    }

    let sizer = tokenizer()?;
    let capacity = ChunkCapacity::new(config.min_tokens)
        .with_max(config.max_tokens)
        .map_err(|e| AppError::Validation(format!("invalid chunk token bounds: {e}")))?;
    let chunk_config = ChunkConfig::new(capacity)
        .with_overlap(config.overlap_tokens)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?
        .with_sizer(sizer);

    let splitter = MarkdownSplitter::new(chunk_config);
    let pieces: Vec<String> = splitter.chunks(text).map(str::to_owned).collect();

    Ok(pieces)
}

/// Token count of `text` under the same tokenizer used for segmentation,
/// so `Chunk::token_count` reflects what actually bounded the split.
pub fn count_tokens(text: &str) -> Result<usize, AppError> {
    let sizer = tokenizer()?;
    let encoding = sizer
        .encode(text, false)
        .map_err(|e| AppError::InternalError(format!("tokenizer encode failed: {e}")))?;
    Ok(encoding.len())
}
