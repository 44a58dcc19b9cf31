//! Raw provider record -> [`RawPaper`]
//!
//! Unusable records (no provider id or no title) yield `None`. Everything else
//! is defaulted so the output never carries nulls for text or counters.

use harvest_common::harvest::{AuthorFields, HarvestContext, PaperFields, RawAuthor, RawPaper};
use harvest_common::{AUTHOR_URL_BASE, PAPER_URL_BASE};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    paper_url_base: String,
    author_url_base: String,
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self {
            paper_url_base: PAPER_URL_BASE.to_string(),
            author_url_base: AUTHOR_URL_BASE.to_string(),
        }
    }
}

fn text(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn count(value: &Value, key: &str) -> i32 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .map(|n| n.clamp(0, i32::MAX as i64) as i32)
        .unwrap_or(0)
}

/// Non-empty string id, or `None`
fn identifier(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

impl RecordNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paper_url(&self, paper_id: &str) -> String {
        format!("{}/{}", self.paper_url_base, paper_id)
    }

    pub fn author_url(&self, author_id: &str) -> String {
        format!("{}/{}", self.author_url_base, author_id)
    }

    pub fn normalize(&self, raw: &Value, context: &HarvestContext) -> Option<RawPaper> {
        let external_id = identifier(raw, "paperId")?;
        let title = raw.get("title").and_then(Value::as_str).map(str::trim)?;
        if title.is_empty() {
            return None;
        }

        // Only a structured object carries the PDF link
        let pdf_url = match raw.get("openAccessPdf") {
            Some(Value::Object(pdf)) => pdf
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };

        let doi = raw
            .get("externalIds")
            .and_then(|ids| ids.get("DOI"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let fields = PaperFields {
            title: title.to_string(),
            abstract_text: text(raw, "abstract"),
            publication_year: raw
                .get("year")
                .and_then(Value::as_i64)
                .and_then(|y| i32::try_from(y).ok()),
            venue: text(raw, "venue"),
            doi,
            url: self.paper_url(&external_id),
            pdf_url,
            citation_count: count(raw, "citationCount"),
            reference_count: count(raw, "referenceCount"),
            influential_citation_count: count(raw, "influentialCitationCount"),
            is_open_access: raw
                .get("isOpenAccess")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };

        Some(RawPaper {
            external_id,
            fields,
            authors: self.authors(raw),
            context: *context,
        })
    }

    /// Authors with a provider id, first occurrence wins
    fn authors(&self, raw: &Value) -> Vec<RawAuthor> {
        let Some(entries) = raw.get("authors").and_then(Value::as_array) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        entries
            .iter()
            .filter_map(|entry| {
                let external_id = identifier(entry, "authorId")?;
                if !seen.insert(external_id.clone()) {
                    return None;
                }
                Some(self.author(entry, external_id))
            })
            .collect()
    }

    fn author(&self, entry: &Value, external_id: String) -> RawAuthor {
        let affiliations = entry
            .get("affiliations")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        RawAuthor {
            fields: AuthorFields {
                full_name: text(entry, "name").trim().to_string(),
                url: self.author_url(&external_id),
                h_index: entry
                    .get("hIndex")
                    .and_then(Value::as_i64)
                    .and_then(|h| i32::try_from(h).ok()),
                paper_count: count(entry, "paperCount"),
                citation_count: count(entry, "citationCount"),
                affiliations,
            },
            external_id,
        }
    }
}
