//! Harvested paper entity, unique by provider id

use crate::harvest::{HarvestContext, PaperFields};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "papers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Provider paper id, the upsert key
    #[sea_orm(column_type = "Text", unique)]
    pub external_id: String,

    pub profile_id: Uuid,

    pub session_id: Option<Uuid>,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub abstract_text: String,

    pub publication_year: Option<i32>,

    #[sea_orm(column_type = "Text")]
    pub venue: String,

    #[sea_orm(column_type = "Text")]
    pub doi: String,

    #[sea_orm(column_type = "Text")]
    pub url: String,

    #[sea_orm(column_type = "Text")]
    pub pdf_url: String,

    pub citation_count: i32,

    pub reference_count: i32,

    pub influential_citation_count: i32,

    pub is_open_access: bool,

    pub scraped_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Build a row from normalized fields
    pub fn from_fields(
        id: Uuid,
        external_id: &str,
        fields: &PaperFields,
        context: &HarvestContext,
        now: DateTimeWithTimeZone,
    ) -> Self {
        let mut paper = Self {
            id,
            external_id: external_id.to_string(),
            profile_id: context.profile_id,
            session_id: context.session_id,
            title: String::new(),
            abstract_text: String::new(),
            publication_year: None,
            venue: String::new(),
            doi: String::new(),
            url: String::new(),
            pdf_url: String::new(),
            citation_count: 0,
            reference_count: 0,
            influential_citation_count: 0,
            is_open_access: false,
            scraped_at: now,
            updated_at: now,
        };
        paper.replace_fields(fields, context, now);
        paper
    }

    /// Overwrite every mutable column; `id`, `external_id` and `scraped_at` are kept
    pub fn replace_fields(&mut self, fields: &PaperFields, context: &HarvestContext, now: DateTimeWithTimeZone) {
        self.profile_id = context.profile_id;
        self.session_id = context.session_id;
        self.title = fields.title.clone();
        self.abstract_text = fields.abstract_text.clone();
        self.publication_year = fields.publication_year;
        self.venue = fields.venue.clone();
        self.doi = fields.doi.clone();
        self.url = fields.url.clone();
        self.pdf_url = fields.pdf_url.clone();
        self.citation_count = fields.citation_count;
        self.reference_count = fields.reference_count;
        self.influential_citation_count = fields.influential_citation_count;
        self.is_open_access = fields.is_open_access;
        self.updated_at = now;
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::harvest_session::Entity",
        from = "Column::SessionId",
        to = "super::harvest_session::Column::Id",
        on_delete = "SetNull"
    )]
    HarvestSession,

    #[sea_orm(has_many = "super::paper_author::Entity")]
    PaperAuthors,
}

impl Related<super::harvest_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::HarvestSession.def()
    }
}

impl Related<super::paper_author::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaperAuthors.def()
    }
}

impl Related<super::author::Entity> for Entity {
    fn to() -> RelationDef {
        super::paper_author::Relation::Author.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::paper_author::Relation::Paper.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
