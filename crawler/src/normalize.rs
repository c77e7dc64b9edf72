//! URL normalization (spec.md §4.1: "dedup URLs by normalized form (scheme,
//! host, path, sorted query)"). A pure function so frontier dedup
//! correctness is unit-testable without a network, grounded in the
//! normalization pass of the web-crawler retrieval source in the example
//! pack (`other_examples/b4f5097d_..._web_crawler.rs.rs`).

use common::error::AppError;
use url::Url;

/// Normalizes `raw` to `scheme://host[:port]/path?sorted=query`, with the
/// fragment stripped and a trailing slash on non-root paths removed so
/// `/docs` and `/docs/` collapse to the same frontier entry.
pub fn normalize_url(raw: &str) -> Result<String, AppError> {
    let mut parsed = Url::parse(raw).map_err(|e| AppError::Validation(format!("invalid URL {raw}: {e}")))?;

    parsed.set_fragment(None);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        let query = pairs
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    if parsed.path().len() > 1 && parsed.path().ends_with('/') {
        let trimmed = parsed.path().trim_end_matches('/').to_string();
        parsed.set_path(&trimmed);
    }

    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fragment() {
        let normalized = normalize_url("https://docs.rs/tokio/latest/tokio/#installation").unwrap();
        assert!(!normalized.contains('#'));
    }

    #[test]
    fn sorts_query_params() {
        let a = normalize_url("https://example.com/search?b=2&a=1").unwrap();
        let b = normalize_url("https://example.com/search?a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn collapses_trailing_slash() {
        let a = normalize_url("https://example.com/docs/").unwrap();
        let b = normalize_url("https://example.com/docs").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn root_path_slash_is_preserved() {
        let normalized = normalize_url("https://example.com/").unwrap();
        assert_eq!(normalized, "https://example.com/");
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(normalize_url("not a url").is_err());
    }
}
