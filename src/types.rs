use crate::domain::Source;
use crate::error::Result;
use crate::pipeline::run::RunContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Intermediate shape every adapter maps its typed upstream records into.
/// Values are still upstream text; the normalizer owns canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: Source,
    pub source_id: String,
    pub facility_name: String,
    pub location: Option<String>,
    pub state: Option<String>,
    pub county: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub violation_type: Option<String>,
    pub description: Option<String>,
    /// Source vocabulary: "High", "Class I", ...
    pub severity: Option<String>,
    pub date: Option<String>,
    pub penalty_amount: Option<f64>,
    pub payload: serde_json::Value,
}

/// An upstream item that failed schema validation and was dropped by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRejection {
    pub item_ref: String,
    pub message: String,
}

/// One page pulled from an adapter.
#[derive(Debug, Default)]
pub struct RecordPage {
    pub records: Vec<RawRecord>,
    pub rejected: Vec<SchemaRejection>,
    /// Upstream items that are valid but are not violations (e.g. compliant facilities)
    pub skipped: u64,
    /// Opaque adapter-owned token for the next page; `None` ends the sequence
    pub next_page: Option<serde_json::Value>,
    /// Since-cursor to persist once the whole sequence has been consumed
    pub checkpoint: Option<String>,
}

/// Core trait that all violation data sources must implement
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique name for this adapter (CLI name and cursor key)
    fn name(&self) -> &'static str;

    /// Canonical source the records are attributed to
    fn source(&self) -> Source;

    /// Overall time budget for one run of this adapter, if any
    fn run_timeout(&self) -> Option<std::time::Duration> {
        None
    }

    /// Fetch one page. `page` is `None` for the first call and otherwise the
    /// `next_page` token of the previous page.
    async fn fetch_page(
        &self,
        ctx: &RunContext,
        since: Option<&str>,
        page: Option<&serde_json::Value>,
    ) -> Result<RecordPage>;
}

/// Lazy sequence of pages over one adapter, starting from an optional since-cursor.
pub struct RecordStream {
    adapter: Arc<dyn SourceAdapter>,
    ctx: Arc<RunContext>,
    since: Option<String>,
    next: Option<serde_json::Value>,
    started: bool,
    finished: bool,
    checkpoint: Option<String>,
}

impl RecordStream {
    pub fn new(adapter: Arc<dyn SourceAdapter>, ctx: Arc<RunContext>, since: Option<String>) -> Self {
        Self {
            adapter,
            ctx,
            since,
            next: None,
            started: false,
            finished: false,
            checkpoint: None,
        }
    }

    /// Pull the next page, or `None` once the adapter reports no further pages.
    /// After an error the stream is finished.
    pub async fn next_page(&mut self) -> Option<Result<RecordPage>> {
        if self.finished {
            return None;
        }
        if self.started && self.next.is_none() {
            self.finished = true;
            return None;
        }
        self.started = true;

        let token = self.next.take();
        match self
            .adapter
            .fetch_page(&self.ctx, self.since.as_deref(), token.as_ref())
            .await
        {
            Ok(page) => {
                self.next = page.next_page.clone();
                if page.checkpoint.is_some() {
                    self.checkpoint = page.checkpoint.clone();
                }
                Some(Ok(page))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    /// Latest checkpoint reported by the adapter so far
    pub fn checkpoint(&self) -> Option<&str> {
        self.checkpoint.as_deref()
    }
}
