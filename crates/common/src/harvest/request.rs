//! Harvest request parameters and their validation rules

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2099;
pub const MIN_LIMIT: u32 = 1;
pub const MAX_LIMIT: u32 = 1000;
pub const DEFAULT_LIMIT: u32 = 100;
pub const MIN_QUERY_WORDS: usize = 3;
pub const MAX_QUERY_WORDS: usize = 10;

/// Fields of study accepted by the provider's `fieldsOfStudy` filter
pub const FIELDS_OF_STUDY: &[&str] = &[
    "Computer Science",
    "Medicine",
    "Chemistry",
    "Biology",
    "Materials Science",
    "Physics",
    "Geology",
    "Psychology",
    "Art",
    "History",
    "Geography",
    "Sociology",
    "Business",
    "Political Science",
    "Economics",
    "Philosophy",
    "Mathematics",
    "Engineering",
    "Environmental Science",
    "Agricultural and Food Sciences",
    "Education",
    "Law",
    "Linguistics",
];

/// Publication types accepted by the provider's `publicationTypes` filter
pub const PUBLICATION_TYPES: &[&str] = &[
    "JournalArticle",
    "Conference",
    "Review",
    "Book",
    "BookSection",
    "Dataset",
];

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

/// A harvest request as submitted by a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_year_order"))]
pub struct HarvestRequest {
    /// Owning identity
    pub profile_id: Uuid,

    #[validate(
        length(min = 1, max = 500, message = "Query must be between 1 and 500 characters"),
        custom(function = "validate_query_words")
    )]
    pub query: String,

    #[validate(range(min = 1900, max = 2099, message = "Year must be between 1900 and 2099"))]
    pub year_from: Option<i32>,

    #[validate(range(min = 1900, max = 2099, message = "Year must be between 1900 and 2099"))]
    pub year_to: Option<i32>,

    #[serde(default)]
    #[validate(custom(function = "validate_fields_of_study"))]
    pub fields_of_study: Vec<String>,

    #[serde(default)]
    #[validate(custom(function = "validate_publication_types"))]
    pub publication_types: Vec<String>,

    #[validate(range(min = 0, message = "Minimum citation count cannot be negative"))]
    pub min_citation_count: Option<i32>,

    #[serde(default)]
    pub open_access_only: bool,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 1000, message = "Limit must be between 1 and 1000"))]
    pub limit: u32,
}

impl HarvestRequest {
    /// A request with only the required parameters set
    pub fn new(profile_id: Uuid, query: impl Into<String>) -> Self {
        Self {
            profile_id,
            query: query.into(),
            year_from: None,
            year_to: None,
            fields_of_study: Vec::new(),
            publication_types: Vec::new(),
            min_citation_count: None,
            open_access_only: false,
            limit: DEFAULT_LIMIT,
        }
    }

    /// Canonical form: trimmed query, duplicate tags removed keeping the first occurrence
    pub fn normalized(mut self) -> Self {
        self.query = self.query.trim().to_string();
        self.fields_of_study = dedup_keep_first(self.fields_of_study);
        self.publication_types = dedup_keep_first(self.publication_types);
        self
    }

    /// Number of filters that narrow the search beyond the query itself
    pub fn filters_applied(&self) -> usize {
        [
            !self.fields_of_study.is_empty(),
            !self.publication_types.is_empty(),
            self.min_citation_count.is_some_and(|n| n > 0),
            self.open_access_only,
        ]
        .iter()
        .filter(|applied| **applied)
        .count()
    }

    /// Human readable year range, e.g. `2019 - Any`
    pub fn year_range_label(&self) -> String {
        let label = |year: Option<i32>| year.map(|y| y.to_string()).unwrap_or_else(|| "Any".into());
        format!("{} - {}", label(self.year_from), label(self.year_to))
    }
}

fn dedup_keep_first(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

fn invalid(code: &'static str, message: String) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Owned(message))
}

fn validate_query_words(query: &str) -> Result<(), ValidationError> {
    let words = query.split_whitespace().count();
    if words == 0 {
        return Err(invalid("blank", "Query cannot be blank".into()));
    }
    if !(MIN_QUERY_WORDS..=MAX_QUERY_WORDS).contains(&words) {
        return Err(invalid(
            "word_count",
            format!(
                "Query must contain between {} and {} words, got {}",
                MIN_QUERY_WORDS, MAX_QUERY_WORDS, words
            ),
        ));
    }
    Ok(())
}

fn validate_tags(tags: &[String], allowed: &[&str], what: &str) -> Result<(), ValidationError> {
    let unknown: Vec<&str> = tags
        .iter()
        .map(String::as_str)
        .filter(|tag| !allowed.contains(tag))
        .collect();

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(invalid(
            "unknown_tag",
            format!("Invalid {}: {}", what, unknown.join(", ")),
        ))
    }
}

fn validate_fields_of_study(tags: &[String]) -> Result<(), ValidationError> {
    validate_tags(tags, FIELDS_OF_STUDY, "field of study")
}

fn validate_publication_types(tags: &[String]) -> Result<(), ValidationError> {
    validate_tags(tags, PUBLICATION_TYPES, "publication type")
}

fn validate_year_order(request: &HarvestRequest) -> Result<(), ValidationError> {
    match (request.year_from, request.year_to) {
        (Some(from), Some(to)) if from > to => Err(invalid(
            "year_order",
            "year_from cannot be greater than year_to".into(),
        )),
        _ => Ok(()),
    }
}

/// Static description of the filters a request may carry
#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub fields_of_study: Vec<&'static str>,
    pub publication_types: Vec<&'static str>,
    pub year_range: RangeOption<i32>,
    pub limit_range: LimitOption,
}

#[derive(Debug, Clone, Serialize)]
pub struct RangeOption<T> {
    pub min: T,
    pub max: T,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimitOption {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl FilterOptions {
    pub fn current() -> Self {
        Self {
            fields_of_study: FIELDS_OF_STUDY.to_vec(),
            publication_types: PUBLICATION_TYPES.to_vec(),
            year_range: RangeOption {
                min: MIN_YEAR,
                max: MAX_YEAR,
            },
            limit_range: LimitOption {
                min: MIN_LIMIT,
                max: MAX_LIMIT,
                default: DEFAULT_LIMIT,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;

    fn request(query: &str) -> HarvestRequest {
        HarvestRequest::new(Uuid::new_v4(), query)
    }

    fn rejected_fields(req: &HarvestRequest) -> Vec<String> {
        let err: AppError = req.validate().unwrap_err().into();
        err.field_errors()
            .iter()
            .map(|e| e.error_field.clone())
            .collect()
    }

    #[test]
    fn test_valid_request() {
        let mut req = request("machine learning safety");
        req.year_from = Some(2019);
        req.year_to = Some(2023);
        req.fields_of_study = vec!["Computer Science".into()];
        req.publication_types = vec!["Conference".into()];
        req.min_citation_count = Some(0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_query_word_bounds() {
        assert_eq!(rejected_fields(&request("two words")), vec!["query"]);
        assert_eq!(
            rejected_fields(&request("one two three four five six seven eight nine ten eleven")),
            vec!["query"]
        );
        assert!(request("  padded three words  ").validate().is_ok());
    }

    #[test]
    fn test_blank_and_overlong_query() {
        assert_eq!(rejected_fields(&request("   ")), vec!["query"]);

        let long = format!("deep learning {}", "x".repeat(500));
        assert_eq!(rejected_fields(&request(&long)), vec!["query"]);
    }

    #[test]
    fn test_year_rules() {
        let mut req = request("graph neural networks");
        req.year_from = Some(1899);
        assert_eq!(rejected_fields(&req), vec!["year_from"]);

        req.year_from = Some(2022);
        req.year_to = Some(2020);
        assert_eq!(rejected_fields(&req), vec!["non_field_errors"]);
    }

    #[test]
    fn test_unknown_tags_rejected() {
        let mut req = request("protein folding prediction");
        req.fields_of_study = vec!["Biology".into(), "Alchemy".into()];
        req.publication_types = vec!["Preprint".into()];

        let err: AppError = req.validate().unwrap_err().into();
        let fields = err.field_errors();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].error_field, "fields_of_study");
        assert!(fields[0].error_message.contains("Alchemy"));
        assert_eq!(fields[1].error_field, "publication_types");
    }

    #[test]
    fn test_limit_and_citation_bounds() {
        let mut req = request("reinforcement learning robotics");
        req.limit = 0;
        req.min_citation_count = Some(-1);
        assert_eq!(rejected_fields(&req), vec!["limit", "min_citation_count"]);

        req.limit = 1000;
        req.min_citation_count = None;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_normalized_dedups_and_trims() {
        let mut req = request("  quantum error correction ");
        req.fields_of_study = vec!["Physics".into(), "Mathematics".into(), "Physics".into()];
        req.publication_types = vec!["Review".into(), "Review".into()];

        let req = req.normalized();
        assert_eq!(req.query, "quantum error correction");
        assert_eq!(req.fields_of_study, vec!["Physics", "Mathematics"]);
        assert_eq!(req.publication_types, vec!["Review"]);
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = serde_json::json!({
            "profile_id": Uuid::new_v4(),
            "query": "large language model evaluation",
            "year_from": 2019,
        });
        let req: HarvestRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.limit, DEFAULT_LIMIT);
        assert!(req.fields_of_study.is_empty());
        assert!(!req.open_access_only);
        assert_eq!(req.year_range_label(), "2019 - Any");
        assert_eq!(req.filters_applied(), 0);
    }

    #[test]
    fn test_zero_citation_floor_is_not_a_filter() {
        let mut req = HarvestRequest::new(Uuid::new_v4(), "large language model evaluation");
        req.min_citation_count = Some(0);
        assert_eq!(req.filters_applied(), 0);

        req.min_citation_count = Some(5);
        req.open_access_only = true;
        assert_eq!(req.filters_applied(), 2);
    }

    #[test]
    fn test_filter_options() {
        let options = FilterOptions::current();
        assert_eq!(options.fields_of_study.len(), 23);
        assert_eq!(options.publication_types.len(), 6);
        assert_eq!(options.limit_range.default, 100);
    }
}
