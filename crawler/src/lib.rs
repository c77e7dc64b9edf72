//! Crawler (C6, spec.md §4.1): fetches pages reachable from each
//! configured [`common::storage::types::source::Source`] within its
//! max-depth/max-pages caps and emits a finite lazy sequence of fetched
//! pages for the chunker to consume.

pub mod crawler;
pub mod normalize;
pub mod robots;
pub mod throttle;

pub use crawler::{CrawledPage, Crawler};
pub use normalize::normalize_url;
