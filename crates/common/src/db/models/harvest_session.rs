//! Harvest session entity, one row per submitted harvest

use crate::harvest::{HarvestRequest, HarvestStatus, SessionCounters};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "harvest_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub profile_id: Uuid,

    // Request parameters, frozen at submission
    #[sea_orm(column_type = "Text")]
    pub query: String,

    pub year_from: Option<i32>,

    pub year_to: Option<i32>,

    #[sea_orm(column_type = "JsonBinary")]
    pub fields_of_study: Json,

    #[sea_orm(column_type = "JsonBinary")]
    pub publication_types: Json,

    pub min_citation_count: Option<i32>,

    pub open_access_only: bool,

    pub result_limit: i32,

    // Lifecycle
    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable, unique)]
    pub job_token: Option<String>,

    pub papers_found: i32,

    pub papers_saved: i32,

    pub errors_count: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// A fresh session for a validated request
    pub fn pending(request: &HarvestRequest, job_token: String, now: DateTimeWithTimeZone) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile_id: request.profile_id,
            query: request.query.clone(),
            year_from: request.year_from,
            year_to: request.year_to,
            fields_of_study: serde_json::json!(request.fields_of_study),
            publication_types: serde_json::json!(request.publication_types),
            min_citation_count: request.min_citation_count,
            open_access_only: request.open_access_only,
            result_limit: request.limit as i32,
            status: HarvestStatus::Pending.as_str().to_string(),
            job_token: Some(job_token),
            papers_found: 0,
            papers_saved: 0,
            errors_count: 0,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Get the session status as an enum
    pub fn status(&self) -> HarvestStatus {
        self.status.parse().unwrap_or(HarvestStatus::Pending)
    }

    /// Check if the session is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            papers_found: self.papers_found,
            papers_saved: self.papers_saved,
            errors_count: self.errors_count,
        }
    }

    pub fn set_counters(&mut self, counters: &SessionCounters) {
        self.papers_found = counters.papers_found;
        self.papers_saved = counters.papers_saved;
        self.errors_count = counters.errors_count;
    }

    pub fn fields_of_study(&self) -> Vec<String> {
        serde_json::from_value(self.fields_of_study.clone()).unwrap_or_default()
    }

    pub fn publication_types(&self) -> Vec<String> {
        serde_json::from_value(self.publication_types.clone()).unwrap_or_default()
    }

    /// Rebuild the request this session was created from
    pub fn request(&self) -> HarvestRequest {
        HarvestRequest {
            profile_id: self.profile_id,
            query: self.query.clone(),
            year_from: self.year_from,
            year_to: self.year_to,
            fields_of_study: self.fields_of_study(),
            publication_types: self.publication_types(),
            min_citation_count: self.min_citation_count,
            open_access_only: self.open_access_only,
            limit: self.result_limit.max(0) as u32,
        }
    }

    /// Display title, e.g. `Machine Learning Safety in Computer Science (2019-2023)`
    pub fn title(&self) -> String {
        let mut parts: Vec<String> = vec![self
            .query
            .split_whitespace()
            .take(3)
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" ")];

        let fields = self.fields_of_study();
        match fields.len() {
            0 => {}
            1 => parts.push(format!("in {}", fields[0])),
            n => parts.push(format!("in {} fields", n)),
        }

        match (self.year_from, self.year_to) {
            (Some(from), Some(to)) => parts.push(format!("({}-{})", from, to)),
            (Some(from), None) => parts.push(format!("(from {})", from)),
            (None, Some(to)) => parts.push(format!("(until {})", to)),
            (None, None) => {}
        }

        let status = self.status();
        if status != HarvestStatus::Success {
            parts.push(format!("[{}]", status));
        }

        parts.join(" ")
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::paper::Entity")]
    Paper,
}

impl Related<super::paper::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Paper.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
