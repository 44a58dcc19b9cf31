//! Normalized paper and author records
//!
//! These are the strongly typed shapes the pipeline hands to the
//! persistence layer. Provider payloads never travel past the normalizer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ownership passed through from the originating request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestContext {
    pub profile_id: Uuid,
    pub session_id: Option<Uuid>,
}

/// Mutable paper columns, replaced wholesale on every upsert
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaperFields {
    pub title: String,
    pub abstract_text: String,
    pub publication_year: Option<i32>,
    pub venue: String,
    pub doi: String,
    pub url: String,
    pub pdf_url: String,
    pub citation_count: i32,
    pub reference_count: i32,
    pub influential_citation_count: i32,
    pub is_open_access: bool,
}

/// Mutable author columns, replaced wholesale on every upsert
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthorFields {
    pub full_name: String,
    pub url: String,
    pub h_index: Option<i32>,
    pub paper_count: i32,
    pub citation_count: i32,
    pub affiliations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAuthor {
    /// Provider author id, the upsert key
    pub external_id: String,
    pub fields: AuthorFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPaper {
    /// Provider paper id, the upsert key
    pub external_id: String,
    pub fields: PaperFields,
    /// Authors in provider order, unique by `external_id`
    pub authors: Vec<RawAuthor>,
    pub context: HarvestContext,
}
