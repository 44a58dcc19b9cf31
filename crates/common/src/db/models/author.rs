//! Author entity, unique by provider id

use crate::harvest::AuthorFields;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "authors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", unique)]
    pub external_id: String,

    #[sea_orm(column_type = "Text")]
    pub full_name: String,

    #[sea_orm(column_type = "Text")]
    pub url: String,

    pub h_index: Option<i32>,

    pub paper_count: i32,

    pub citation_count: i32,

    /// Ordered list of affiliation names
    #[sea_orm(column_type = "JsonBinary")]
    pub affiliations: Json,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn from_fields(id: Uuid, external_id: &str, fields: &AuthorFields, now: DateTimeWithTimeZone) -> Self {
        let mut author = Self {
            id,
            external_id: external_id.to_string(),
            full_name: String::new(),
            url: String::new(),
            h_index: None,
            paper_count: 0,
            citation_count: 0,
            affiliations: Json::Array(Vec::new()),
            created_at: now,
            updated_at: now,
        };
        author.replace_fields(fields, now);
        author
    }

    /// Overwrite every mutable column, affiliations included
    pub fn replace_fields(&mut self, fields: &AuthorFields, now: DateTimeWithTimeZone) {
        self.full_name = fields.full_name.clone();
        self.url = fields.url.clone();
        self.h_index = fields.h_index;
        self.paper_count = fields.paper_count;
        self.citation_count = fields.citation_count;
        self.affiliations = serde_json::json!(fields.affiliations);
        self.updated_at = now;
    }

    pub fn affiliations(&self) -> Vec<String> {
        serde_json::from_value(self.affiliations.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::paper_author::Entity")]
    PaperAuthors,
}

impl Related<super::paper_author::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaperAuthors.def()
    }
}

impl Related<super::paper::Entity> for Entity {
    fn to() -> RelationDef {
        super::paper_author::Relation::Paper.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::paper_author::Relation::Author.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
