//! Chunker & Quality Scorer (C5, spec.md §4.2): turns a raw fetched
//! document into an ordered sequence of bounded chunks with topics and a
//! quality score. Grounded in the teacher's `text-splitter` +
//! `tokenizers` dependency pair (`ingestion-pipeline/src/pipeline/services.rs`'s
//! now-generalized `prepare_chunks`), switched to the markdown-aware
//! splitter so code fences are never split, plus HTML stripping via
//! `scraper` (pattern borrowed from a sibling example repo's optional
//! `scraper` dependency — the teacher never parses raw HTML itself).

mod extraction;
mod quality;
mod segmentation;
mod topics;

use common::error::AppError;
use tracing::instrument;

/// Recognized-option configuration for the chunker (spec.md §9's chunk
/// token band, overlap size, and topic cap), plus the framework/concept
/// allowlist topic extraction seeds from.
#[derive(Clone, Debug)]
pub struct ChunkerConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub max_topics: usize,
    pub topic_allowlist: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: 128,
            max_tokens: 512,
            overlap_tokens: 48,
            max_topics: 8,
            topic_allowlist: Vec::new(),
        }
    }
}

/// One chunk produced from a document, prior to embedding and storage
/// (ordinal, text, token count, topics, quality score — spec.md §3's
/// `Chunk` entity minus the fields only the store can fill in: id,
/// document id, embedding ref).
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkDraft {
    pub ordinal: u32,
    pub text: String,
    pub token_count: u32,
    pub topics: Vec<String>,
    pub quality_score: f32,
}

/// Runs the full §4.2 algorithm: extract main text, segment into bounded
/// chunks, and score each one. Fails with `UnsupportedContentType` or
/// `ExtractionEmpty` per the extraction contract; never returns an empty
/// chunk list on success.
#[instrument(skip(raw, config), fields(content_type, len = raw.len()))]
pub fn chunk_document(
    raw: &[u8],
    content_type: &str,
    config: &ChunkerConfig,
) -> Result<Vec<ChunkDraft>, AppError> {
    let text = extraction::extract_text(raw, content_type)?;
    let pieces = segmentation::split(&text, config)?;

    if pieces.is_empty() {
        return Err(AppError::ExtractionEmpty);
    }

    let mut drafts = Vec::with_capacity(pieces.len());
    for (ordinal, piece) in pieces.into_iter().enumerate() {
        let token_count = segmentation::count_tokens(&piece)?;
        let topics = topics::extract_topics(&piece, &config.topic_allowlist, config.max_topics);
        let quality_score = quality::quality_score(
            &piece,
            token_count,
            config.min_tokens,
            topics.len(),
            config.max_topics,
        );

        drafts.push(ChunkDraft {
            #[allow(clippy::cast_possible_truncation)]
            ordinal: ordinal as u32,
            text: piece,
            #[allow(clippy::cast_possible_truncation)]
            token_count: token_count as u32,
            topics,
            quality_score,
        });
    }

    Ok(drafts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkerConfig {
        ChunkerConfig {
            min_tokens: 8,
            max_tokens: 64,
            overlap_tokens: 2,
            max_topics: 8,
            topic_allowlist: vec!["axum".to_string(), "tokio".to_string()],
        }
    }

    #[test]
    fn ordinals_are_dense_and_monotonic() {
        let html = br#"<html><body><main>
            <h1>Token Refresh</h1>
            <p>Tokens expire after a configured interval and must be refreshed.</p>
            <p>The refresh flow exchanges a refresh token for a new access token.</p>
            <h2>Using axum</h2>
            <p>Wire the refresh handler into an axum router as any other route.</p>
        </main></body></html>"#;

        let drafts = chunk_document(html, "text/html", &config()).unwrap();
        assert!(!drafts.is_empty());
        for (i, draft) in drafts.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let expected = i as u32;
            assert_eq!(draft.ordinal, expected);
        }
    }

    #[test]
    fn quality_scores_are_bounded() {
        let drafts = chunk_document(b"Plain prose about routing.", "text/plain", &config()).unwrap();
        for draft in drafts {
            assert!((0.0..=1.0).contains(&draft.quality_score));
        }
    }

    #[test]
    fn propagates_extraction_empty() {
        let err = chunk_document(b"   ", "text/plain", &config()).unwrap_err();
        assert!(matches!(err, AppError::ExtractionEmpty));
    }

    #[test]
    fn propagates_unsupported_content_type() {
        let err = chunk_document(b"\x00\x01", "application/octet-stream", &config()).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedContentType(_)));
    }

    #[test]
    fn topics_seeded_from_allowlist_appear_on_matching_chunks() {
        let html = br#"<html><body><main>
            <h1>Routing</h1>
            <p>This guide uses axum extensively for building HTTP routes.</p>
        </main></body></html>"#;
        let drafts = chunk_document(html, "text/html", &config()).unwrap();
        assert!(drafts.iter().any(|d| d.topics.iter().any(|t| t == "axum")));
    }
}
