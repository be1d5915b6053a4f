//! Budget matching, validation, and enrichment (C7).

pub mod evaluator;

pub use evaluator::{match_by_context, match_event, validate, validate_for_context};
