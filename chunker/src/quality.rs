//! Quality scoring (spec.md §4.2 step 5): a bounded, monotone-in-useful-
//! content combination of length adequacy, signal-to-noise, and topic
//! coverage. Coefficients fixed per DESIGN.md's Open Question decision
//! (`0.4 / 0.35 / 0.25`), chosen so short, clean, well-labeled chunks are
//! not suppressed by the length term.

const LENGTH_WEIGHT: f32 = 0.4;
const SIGNAL_WEIGHT: f32 = 0.35;
const TOPIC_WEIGHT: f32 = 0.25;

/// Computes a chunk's quality score in `[0, 1]`.
///
/// `token_count` below `min_tokens` is penalized proportionally (the chunk
/// is short); at or above `min_tokens` length is considered adequate
/// regardless of how close to `max_tokens` it sits, since spec.md only
/// requires chunks to fall within the band, not to maximize length.
pub fn quality_score(
    chunk_text: &str,
    token_count: usize,
    min_tokens: usize,
    topics_found: usize,
    max_topics: usize,
) -> f32 {
    let length_adequacy = length_adequacy(token_count, min_tokens);
    let signal = signal_to_noise(chunk_text);
    let topic_coverage = (topics_found as f32 / max_topics.max(1) as f32).clamp(0.0, 1.0);

    (LENGTH_WEIGHT * length_adequacy + SIGNAL_WEIGHT * signal + TOPIC_WEIGHT * topic_coverage)
        .clamp(0.0, 1.0)
}

fn length_adequacy(token_count: usize, min_tokens: usize) -> f32 {
    if min_tokens == 0 {
        return 1.0;
    }
    if token_count >= min_tokens {
        1.0
    } else {
        (token_count as f32 / min_tokens as f32).clamp(0.0, 1.0)
    }
}

/// Balances code vs. prose content and penalizes link density. Code and
/// prose both count as useful signal (spec.md: "documents with only code
/// produce chunks with elevated code-share... rather than being
/// rejected"), so a pure-code chunk scores as high on this term as a
/// pure-prose one; only link-heavy boilerplate pulls the score down.
fn signal_to_noise(text: &str) -> f32 {
    let total = text.chars().count().max(1) as f32;
    let code_chars = fenced_code_char_count(text) as f32;
    let code_share = (code_chars / total).clamp(0.0, 1.0);
    let link_density = (markdown_link_count(text) as f32 / total * 40.0).clamp(0.0, 1.0);

    (0.5 + 0.5 * code_share - link_density).clamp(0.0, 1.0)
}

fn fenced_code_char_count(text: &str) -> usize {
    let mut inside = false;
    let mut count = 0usize;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            inside = !inside;
            continue;
        }
        if inside {
            count += line.len();
        }
    }
    count
}

fn markdown_link_count(text: &str) -> usize {
    text.matches("](").count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_always_in_unit_range() {
        for text in ["", "a", &"x".repeat(10_000), "```\ncode\n```"] {
            let score = quality_score(text, text.len(), 50, 0, 8);
            assert!((0.0..=1.0).contains(&score), "score {score} out of range for {text:?}");
        }
    }

    #[test]
    fn short_chunk_scores_lower_than_adequate_chunk_on_length_term() {
        let short = length_adequacy(10, 50);
        let adequate = length_adequacy(50, 50);
        assert!(short < adequate);
        assert_eq!(adequate, 1.0);
    }

    #[test]
    fn code_only_chunk_is_not_penalized_relative_to_prose() {
        let code_only = quality_score("```\nfn main() {}\n```", 20, 16, 1, 8);
        let prose_only = quality_score("Just some plain prose text here.", 20, 16, 1, 8);
        assert!(code_only >= prose_only - 0.05);
    }

    #[test]
    fn link_heavy_text_scores_lower() {
        let clean = signal_to_noise("A normal paragraph about routing and middleware.");
        let linky = signal_to_noise(&"[link](http://x) ".repeat(50));
        assert!(linky < clean);
    }

    #[test]
    fn monotone_in_topic_coverage() {
        let fewer = quality_score("text", 50, 50, 1, 8);
        let more = quality_score("text", 50, 50, 4, 8);
        assert!(more > fewer);
    }
}
