//! Normalisation of the fields record linkage compares on.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::models::Author;

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

const LEADING_ARTICLES: &[&str] = &["a", "an", "the"];

/// Lowercased DOI with resolver/`doi:` prefixes removed.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_lowercase();
    for prefix in DOI_PREFIXES {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim_start().to_string();
            break;
        }
    }
    if doi.is_empty() { None } else { Some(doi) }
}

/// Lowercase, drop punctuation, collapse whitespace, drop one leading article.
pub fn normalize_title(title: &str) -> String {
    let stripped: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    let words: Vec<&str> = stripped.split_whitespace().collect();
    let words = match words.split_first() {
        Some((first, rest)) if LEADING_ARTICLES.contains(first) && !rest.is_empty() => rest,
        _ => &words[..],
    };
    words.join(" ")
}

/// SHA-256 of a normalised title, hex encoded.
pub fn title_hash(normalized_title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_title.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn normalize_author(name: &str) -> String {
    let stripped: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shared normalised author names divided by the shorter author list.
/// 0.0 when either side has no authors.
pub fn author_overlap(a: &[Author], b: &[Author]) -> f64 {
    let left: HashSet<String> = a
        .iter()
        .map(|x| normalize_author(&x.name))
        .filter(|n| !n.is_empty())
        .collect();
    let right: HashSet<String> = b
        .iter()
        .map(|x| normalize_author(&x.name))
        .filter(|n| !n.is_empty())
        .collect();

    let smaller = left.len().min(right.len());
    if smaller == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / smaller as f64
}
