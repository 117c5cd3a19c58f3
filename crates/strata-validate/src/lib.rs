//! Validation of persisted strata indexes.
//!
//! [`validate_index_artifacts`] walks every configured mode's index directory and produces a
//! [`Report`]: schema violations, broken cross-artifact references, and missing pieces become
//! issues; degraded optional checks become warnings. Only failures that prevent a report from
//! being produced at all surface as [`ValidateError`].

mod error;
pub mod referential;
pub mod report;
pub mod risk;
pub mod schema;
pub mod sqlite;
mod validate;

pub use error::{Result, ValidateError};
pub use report::{ModeReport, Report};
pub use schema::Payload;
pub use validate::{
    load_and_validate_chunk_meta, normalize_document, validate_index_artifacts, validate_mode,
    validate_schema, ValidateOptions,
};
