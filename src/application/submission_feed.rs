//! Live pagination over a form's submissions.

use tracing::warn;

use crate::application::job_control::KillSwitch;
use crate::domain::entities::Submission;
use crate::domain::pagination::PageToken;
use crate::domain::repositories::SubmissionSource;
use crate::infrastructure::sync_error::SyncResult;

/// Walks the pages of one form until the upstream runs dry.
///
/// Stops on an empty page, an absent token, a token that repeats the one just
/// used, or after `max_pages`.
pub struct SubmissionPager<'a> {
    source: &'a dyn SubmissionSource,
    form_id: &'a str,
    next: Option<String>,
    pages_read: usize,
    max_pages: Option<usize>,
    exhausted: bool,
}

impl<'a> SubmissionPager<'a> {
    pub fn new(source: &'a dyn SubmissionSource, form_id: &'a str, start: Option<String>) -> Self {
        Self {
            source,
            form_id,
            next: start,
            pages_read: 0,
            max_pages: None,
            exhausted: false,
        }
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Token that fetches the next page; `None` at the start or once exhausted.
    pub fn position(&self) -> Option<&str> {
        self.next.as_deref()
    }

    /// True once the upstream has no more pages (as opposed to a page limit).
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub async fn next_page(&mut self) -> SyncResult<Option<Vec<Submission>>> {
        if self.exhausted || self.max_pages.is_some_and(|max| self.pages_read >= max) {
            return Ok(None);
        }

        let page = self.source.fetch_page(self.form_id, self.next.as_deref()).await?;
        self.pages_read += 1;

        if page.results.is_empty() {
            self.finish();
            return Ok(None);
        }

        match page.next {
            PageToken::Absent => self.finish(),
            PageToken::Token(token) if self.next.as_deref() == Some(token.as_str()) => {
                warn!("🔁 Form {} returned the same page token twice, stopping: {}", self.form_id, token);
                self.finish();
            }
            PageToken::Token(token) => self.next = Some(token),
        }
        Ok(Some(page.results))
    }

    fn finish(&mut self) {
        self.exhausted = true;
        self.next = None;
    }
}

/// Everything one form has to offer, page by page.
#[derive(Debug, Default)]
pub struct FetchedPages {
    pub pages: Vec<Vec<Submission>>,
    pub killed: bool,
}

impl FetchedPages {
    pub fn total(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn submissions(&self) -> impl Iterator<Item = &Submission> {
        self.pages.iter().flatten()
    }
}

/// Fetch every page of a form, checking the kill switch before each fetch.
pub async fn fetch_all(
    source: &dyn SubmissionSource,
    form_id: &str,
    max_pages: usize,
    kill: &KillSwitch,
) -> SyncResult<FetchedPages> {
    let mut pager = SubmissionPager::new(source, form_id, None).with_max_pages(max_pages);
    let mut fetched = FetchedPages::default();
    loop {
        if kill.is_killed() {
            fetched.killed = true;
            break;
        }
        match pager.next_page().await? {
            Some(page) => fetched.pages.push(page),
            None => break,
        }
    }
    Ok(fetched)
}
