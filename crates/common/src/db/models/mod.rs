//! SeaORM entity models
//!
//! Database entities for harvested papers, authors and harvest sessions

mod author;
mod harvest_session;
mod paper;
mod paper_author;

pub use paper::{
    Entity as PaperEntity,
    Model as Paper,
    ActiveModel as PaperActiveModel,
    Column as PaperColumn,
};

pub use author::{
    Entity as AuthorEntity,
    Model as Author,
    ActiveModel as AuthorActiveModel,
    Column as AuthorColumn,
};

pub use paper_author::{
    Entity as PaperAuthorEntity,
    Model as PaperAuthor,
    ActiveModel as PaperAuthorActiveModel,
    Column as PaperAuthorColumn,
};

pub use harvest_session::{
    Entity as HarvestSessionEntity,
    Model as HarvestSession,
    ActiveModel as HarvestSessionActiveModel,
    Column as HarvestSessionColumn,
};
