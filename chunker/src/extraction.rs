//! Text extraction (spec.md §4.2 step 1): strip navigation and boilerplate
//! from HTML, preserve code-block contents, and fail with the two named
//! edge errors (`UnsupportedContentType`, `ExtractionEmpty`).

use common::error::AppError;
use scraper::{ElementRef, Html, Selector};

const BOILERPLATE_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form",
];
const BLOCK_SELECTOR: &str = "h1,h2,h3,h4,h5,h6,p,pre,li,blockquote";
const CONTENT_ROOT_CANDIDATES: &[&str] = &["main", "article", "body"];

/// Extracts main text from a fetched document, routing on content type.
/// HTML is converted to a markdown-ish rendering (headings as `#` lines,
/// code blocks fenced) so the segmenter's markdown-aware splitter can
/// treat code fences as atomic; plain text passes through unchanged.
pub fn extract_text(raw: &[u8], content_type: &str) -> Result<String, AppError> {
    let normalized = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let text = std::str::from_utf8(raw)
        .map_err(|_| AppError::UnsupportedContentType(normalized.clone()))?;

    let extracted = if normalized.contains("html") {
        extract_from_html(text)
    } else if normalized.is_empty() || normalized.starts_with("text/") || normalized.contains("markdown") {
        text.to_string()
    } else {
        return Err(AppError::UnsupportedContentType(normalized));
    };

    if extracted.trim().is_empty() {
        return Err(AppError::ExtractionEmpty);
    }

    Ok(extracted)
}

fn has_boilerplate_ancestor(el: &ElementRef) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| BOILERPLATE_TAGS.contains(&a.value().name()))
}

fn extract_from_html(html: &str) -> String {
    let document = Html::parse_document(html);

    let Some(root) = CONTENT_ROOT_CANDIDATES.iter().find_map(|tag| {
        Selector::parse(tag).ok().and_then(|s| document.select(&s).next())
    }) else {
        return String::new();
    };

    #[allow(clippy::unwrap_used)]
    let block_selector = Selector::parse(BLOCK_SELECTOR).unwrap();

    let mut out = String::new();
    for el in root.select(&block_selector) {
        if has_boilerplate_ancestor(&el) {
            continue;
        }

        match el.value().name() {
            "pre" => push_code_block(&mut out, &el),
            tag @ ("h1" | "h2" | "h3" | "h4" | "h5" | "h6") => push_heading(&mut out, &el, tag),
            _ => push_paragraph(&mut out, &el),
        }
    }
    out
}

fn push_code_block(out: &mut String, el: &ElementRef) {
    let code = el.text().collect::<Vec<_>>().join("");
    let trimmed = code.trim_end();
    if trimmed.is_empty() {
        return;
    }
    out.push_str("\n```\n");
    out.push_str(trimmed);
    out.push_str("\n```\n\n");
}

fn push_heading(out: &mut String, el: &ElementRef, tag: &str) {
    let level = tag.get(1..).and_then(|d| d.parse::<usize>().ok()).unwrap_or(1);
    let text = collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
    if text.is_empty() {
        return;
    }
    out.push_str(&"#".repeat(level.clamp(1, 6)));
    out.push(' ');
    out.push_str(&text);
    out.push_str("\n\n");
}

fn push_paragraph(out: &mut String, el: &ElementRef) {
    let text = collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
    if text.is_empty() {
        return;
    }
    out.push_str(&text);
    out.push_str("\n\n");
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
