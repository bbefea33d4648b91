//! Paginated work enumeration.

use std::collections::HashSet;
use std::sync::Arc;

use crate::api::{RemoteApi, WorkItem};
use crate::error::{RemedyError, Result};
use crate::retry::{AttemptLog, CallError, RetryExecutor};

/// Walks every page of a listing through the retry executor.
///
/// A page that cannot be fetched aborts the whole enumeration: processing a
/// partial listing would silently skip items.
pub struct WorkSource<A: RemoteApi> {
    api: Arc<A>,
    executor: Arc<RetryExecutor>,
    page_max_attempts: u32,
}

impl<A: RemoteApi> WorkSource<A> {
    pub fn new(api: Arc<A>, executor: Arc<RetryExecutor>, page_max_attempts: u32) -> Self {
        Self {
            api,
            executor,
            page_max_attempts,
        }
    }

    /// Collect all items matching `filter`, in listing order.
    ///
    /// Ids seen on an earlier page are dropped with a warning. A cursor that
    /// comes back twice is fatal.
    pub async fn enumerate(&self, filter: &A::Filter) -> Result<Vec<WorkItem>> {
        let mut items = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let mut log = AttemptLog::new();
            let page = self
                .executor
                .execute("list_page", self.page_max_attempts, &mut log, || {
                    self.api.list_page(filter, cursor.as_deref())
                })
                .await
                .map_err(|e| match e {
                    CallError::Permanent { detail } => RemedyError::EnumerationRejected(detail),
                    CallError::Exhausted {
                        attempts,
                        last_error,
                    } => RemedyError::Enumeration {
                        attempts,
                        detail: last_error,
                    },
                })?;
            pages += 1;

            for item in page.items {
                if seen_ids.insert(item.id.clone()) {
                    items.push(item);
                } else {
                    tracing::warn!(item = %item.id, page = pages, "duplicate item in listing, skipping");
                }
            }
            tracing::debug!(page = pages, total = items.len(), "listing page fetched");

            match page.next_cursor {
                None => break,
                Some(next) => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(RemedyError::CursorLoop(next));
                    }
                    cursor = Some(next);
                }
            }
        }

        tracing::info!(items = items.len(), pages, "enumeration complete");
        Ok(items)
    }
}
