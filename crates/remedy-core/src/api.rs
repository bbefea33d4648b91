//! The remote API seam.
//!
//! The engine never talks HTTP itself. Everything it needs from the remote
//! service goes through [`RemoteApi`]: paginated listing, a point read of one
//! record, and a generic mutation call. Each call reports failures as a
//! [`RemoteError`] whose variant drives retry classification.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// WorkItem / Page
// ---------------------------------------------------------------------------

/// One remote record targeted for remediation.
///
/// `payload` carries whatever fields the remediation sub-steps need. The
/// engine treats it as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WorkItem {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            payload,
        }
    }
}

/// One page of a listing. `next_cursor == None` ends the enumeration.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<WorkItem>,
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// Failure of a single remote call, already classified by the client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The server explicitly asked the caller to slow down.
    #[error("throttled by server")]
    Throttled { retry_after: Option<Duration> },

    /// Timeout, connection failure, 5xx. Worth retrying.
    #[error("transient error: {0}")]
    Transient(String),

    /// Validation failure or any 4xx other than throttling. Never retried.
    #[error("rejected: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

// ---------------------------------------------------------------------------
// RemoteApi
// ---------------------------------------------------------------------------

/// Client for the remote service holding the records to remediate.
///
/// `Filter` and `Mutation` are chosen by the client; the engine only passes
/// them through.
#[async_trait]
pub trait RemoteApi: Send + Sync + 'static {
    type Filter: fmt::Debug + Send + Sync;
    type Mutation: fmt::Debug + Send + Sync;

    /// Fetch one page of candidate records. `cursor == None` requests the first page.
    async fn list_page(
        &self,
        filter: &Self::Filter,
        cursor: Option<&str>,
    ) -> Result<Page, RemoteError>;

    /// Re-read the current remote state of one record.
    async fn fetch(&self, item_id: &str) -> Result<WorkItem, RemoteError>;

    /// Apply one write. The returned value is the server's response body.
    async fn perform_mutation(
        &self,
        mutation: &Self::Mutation,
    ) -> Result<serde_json::Value, RemoteError>;
}
