//! Domain module - Core recovery logic and entities
//!
//! This module contains the submission/contact entities, pagination tokens,
//! job state, the upstream interfaces and the pure domain services
//! (parsing, dedupe, update planning).
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod entities;
pub mod job_state;
pub mod pagination;
pub mod repositories;
pub mod services;

// Re-export commonly used items for convenience
pub use entities::{
    normalize_email, Contact, FieldMapping, FormFieldMap, RawFieldValue, Submission, UpdatePlan,
};
pub use job_state::{Cursor, JobKind, JobState, JobStatus, RunCounters, RunMode, RunSummary};
pub use pagination::{PageToken, SubmissionPage};
pub use repositories::{ContactStore, SubmissionSource};
