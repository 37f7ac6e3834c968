//! Finds object references in document text.
//!
//! Matching is purely textual: any `<base_url>/<path>` occurrence counts,
//! where `<path>` runs until a double quote, `]`, `)` or whitespace. That
//! one rule covers markdown images and links, iframe `src` attributes,
//! bare URLs and bracketed references. Occurrences inside code blocks or
//! comments still count, so an object is never considered unused while
//! its URL appears anywhere in the corpus.

use crate::models::reference::ObjectReference;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

/// Something that can list the object references in a text.
pub trait ReferenceSource: Send + Sync {
    /// Base URL references are resolved against.
    fn base_url(&self) -> &str;

    /// Decoded references in `text`, in order of appearance, duplicates kept.
    fn references(&self, text: &str) -> Vec<ObjectReference>;
}

/// Regex-based scanner for one proxy base URL.
#[derive(Debug, Clone)]
pub struct ReferenceScanner {
    base_url: String,
    pattern: Regex,
}

impl ReferenceScanner {
    pub fn new(base_url: &str) -> Result<Self, regex::Error> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let pattern = Regex::new(&format!(r#"{}/[^"\])\s]*"#, regex::escape(&base_url)))?;
        Ok(Self { base_url, pattern })
    }

    /// Raw URL matches in `text`, duplicates kept.
    pub fn extract<'t>(&self, text: &'t str) -> Vec<&'t str> {
        if !text.contains(self.base_url.as_str()) {
            return Vec::new();
        }
        self.pattern.find_iter(text).map(|m| m.as_str()).collect()
    }

    fn decode(&self, raw: &str) -> ObjectReference {
        match ObjectReference::parse(raw, &self.base_url) {
            Ok(reference) => reference,
            Err(err) => {
                // Keep the undecoded path so the object is still protected.
                debug!(url = %raw, error = %err, "keeping undecodable reference verbatim");
                let rest = raw[self.base_url.len()..].trim_start_matches('/');
                let path = rest.split('?').next().unwrap_or(rest);
                ObjectReference {
                    path: path.to_string(),
                    client: None,
                    bucket: None,
                }
            }
        }
    }
}

impl ReferenceSource for ReferenceScanner {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn references(&self, text: &str) -> Vec<ObjectReference> {
        self.extract(text)
            .into_iter()
            .map(|raw| self.decode(raw))
            .filter(|r| !r.path.is_empty())
            .collect()
    }
}

/// Every reference to `base_url` in `text`, before deduplication.
pub fn extract_references(text: &str, base_url: &str) -> Result<Vec<String>, regex::Error> {
    let scanner = ReferenceScanner::new(base_url)?;
    Ok(scanner.extract(text).into_iter().map(str::to_string).collect())
}

/// Deduplicated references across a corpus.
pub fn scan_references<I, S>(source: &dyn ReferenceSource, documents: I) -> BTreeSet<ObjectReference>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    documents
        .into_iter()
        .flat_map(|doc| source.references(doc.as_ref()))
        .collect()
}

/// Deduplicated, decoded object paths referenced anywhere in `documents`.
pub fn scan<I, S>(documents: I, base_url: &str) -> Result<BTreeSet<String>, regex::Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let scanner = ReferenceScanner::new(base_url)?;
    Ok(scan_references(&scanner, documents)
        .into_iter()
        .map(|r| r.path)
        .collect())
}
