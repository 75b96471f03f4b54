//! Durable violation storage.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::domain::{Severity, Source, StateCode, Violation};
use crate::error::Result;
use crate::pipeline::run::RunSummary;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

/// Conjunctive filter over stored violations; `None` fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViolationFilter {
    /// Case-insensitive substring of facility name or description
    pub search: Option<String>,
    pub state: Option<StateCode>,
    pub source: Option<Source>,
    pub severity: Option<Severity>,
    /// Case-insensitive substring of the violation type
    pub violation_type: Option<String>,
    /// Inclusive bounds; records without a date never match a bounded filter
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// 1-based page of `per_page` rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        (self.page.max(1) as u64 - 1) * self.per_page as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    State,
    Severity,
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Unchanged => "unchanged",
        }
    }
}

/// Storage trait for violations, ingestion runs and per-adapter cursors
#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// Insert or replace by identifier in one transaction. An existing record
    /// keeps its `first_seen_at`.
    async fn upsert(&self, violation: &Violation) -> Result<UpsertOutcome>;

    async fn get(&self, id: Uuid) -> Result<Option<Violation>>;

    /// One page in date-descending order (null dates last, ties by id) and
    /// the total number of matches.
    async fn query(&self, filter: &ViolationFilter, page: PageRequest) -> Result<(Vec<Violation>, u64)>;

    /// Counts per group value, largest first. Null values are excluded.
    async fn aggregate_counts(&self, group_by: GroupBy) -> Result<Vec<(String, u64)>>;

    async fn total_count(&self) -> Result<u64>;

    /// Record a run as `running`. Fails with `RunInProgress` while another
    /// run younger than `lease_timeout` is still running.
    async fn begin_run(&self, run: &RunSummary, lease_timeout: chrono::Duration) -> Result<()>;

    async fn finish_run(&self, run: &RunSummary) -> Result<()>;

    async fn recent_runs(&self, limit: u32) -> Result<Vec<RunSummary>>;

    async fn source_cursor(&self, adapter: &str) -> Result<Option<String>>;

    async fn set_source_cursor(&self, adapter: &str, cursor: &str) -> Result<()>;
}
