//! Harvest domain types
//!
//! - `request`: submitted parameters and their validation
//! - `status`: the session state machine
//! - `records`: normalized paper/author records handed to persistence
//! - `service`: submission and status polling

mod records;
mod request;
mod service;
mod status;

pub use records::{AuthorFields, HarvestContext, PaperFields, RawAuthor, RawPaper};
pub use request::{
    FilterOptions, HarvestRequest, LimitOption, RangeOption, DEFAULT_LIMIT, FIELDS_OF_STUDY,
    MAX_LIMIT, MAX_YEAR, MIN_LIMIT, MIN_YEAR, PUBLICATION_TYPES,
};
pub use service::{
    HarvestResult, HarvestService, JobStatusReport, ParametersSummary, SessionSummary,
    SubmissionReceipt, UNKNOWN_STATUS,
};
pub use status::{HarvestStatus, SessionCounters, SessionTransition, TransitionOutcome};
