//! Upstream interfaces used by the recovery runner.
//!
//! The HubSpot client implements both traits; tests swap in in-memory fakes.

use async_trait::async_trait;

use crate::domain::entities::{Contact, UpdatePlan};
use crate::domain::pagination::SubmissionPage;
use crate::infrastructure::sync_error::SyncResult;

#[async_trait]
pub trait SubmissionSource: Send + Sync {
    /// One page of submissions for a form, newest first.
    /// A missing or invalid form yields an empty page, not an error.
    async fn fetch_page(&self, form_id: &str, after: Option<&str>) -> SyncResult<SubmissionPage>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Exact-match search on `email`, at most one result.
    async fn find_by_email(&self, email: &str, properties: &[String]) -> SyncResult<Option<Contact>>;

    async fn update_contact(&self, contact_id: &str, plan: &UpdatePlan) -> SyncResult<()>;
}
