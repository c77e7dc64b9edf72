//! Topic extraction (spec.md §4.2 step 4): a bounded, deterministic set of
//! canonical topic strings drawn from a chunk's own markdown headings plus
//! an allowlist of framework/concept names. No LLM call — spec.md requires
//! topics to be "deterministic given the text", which a generative tagger
//! cannot guarantee.

/// Extracts up to `max_topics` canonical topic strings from `chunk_text`:
/// first its own `#`-prefixed headings (in order of appearance), then any
/// `allowlist` terms it mentions (in allowlist order), deduplicated
/// case-insensitively.
pub fn extract_topics(chunk_text: &str, allowlist: &[String], max_topics: usize) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();

    for line in chunk_text.lines() {
        let trimmed = line.trim_start_matches('#').trim();
        if line.trim_start().starts_with('#') && !trimmed.is_empty() {
            push_unique(&mut topics, trimmed);
        }
    }

    let lower = chunk_text.to_ascii_lowercase();
    for term in allowlist {
        if lower.contains(&term.to_ascii_lowercase()) {
            push_unique(&mut topics, term);
        }
    }

    topics.truncate(max_topics);
    topics
}

fn push_unique(topics: &mut Vec<String>, candidate: &str) {
    if !topics.iter().any(|t| t.eq_ignore_ascii_case(candidate)) {
        topics.push(candidate.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_come_before_allowlist_matches() {
        let text = "# Token Refresh\n\nThis guide uses axum for routing.";
        let topics = extract_topics(text, &["axum".to_string()], 8);
        assert_eq!(topics, vec!["Token Refresh".to_string(), "axum".to_string()]);
    }

    #[test]
    fn deduplicates_case_insensitively() {
        let text = "# Axum\n\nAxum is great, axum handles routing.";
        let topics = extract_topics(text, &["axum".to_string()], 8);
        assert_eq!(topics, vec!["Axum".to_string()]);
    }

    #[test]
    fn bounded_by_max_topics() {
        let text = "# A\n## B\n### C\n#### D";
        let topics = extract_topics(text, &[], 2);
        assert_eq!(topics.len(), 2);
    }

    #[test]
    fn is_deterministic_given_identical_text() {
        let text = "# Routing\n\naxum and tokio both appear here.";
        let allow = vec!["axum".to_string(), "tokio".to_string()];
        assert_eq!(extract_topics(text, &allow, 8), extract_topics(text, &allow, 8));
    }
}
