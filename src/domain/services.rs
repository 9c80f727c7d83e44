//! Domain services
//!
//! Pure pipeline logic that does not touch the network or the filesystem:
//! parsing submissions, deduplicating them and planning contact updates.

pub mod deduplication;
pub mod submission_parser;
pub mod update_planner;

pub use deduplication::{dedupe_submissions, find_entry, observed_field_names, DedupeOutcome, DedupedEntry};
pub use submission_parser::{ParsedSubmission, SubmissionParser, CHECKBOX_VOCABULARY};
pub use update_planner::UpdatePlanner;
