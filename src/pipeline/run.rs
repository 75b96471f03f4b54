use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// The ingestion run currently executing, passed to adapters and the normalizer.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Ignore stored since-cursors and fetch everything
    pub full_refresh: bool,
    cursors: HashMap<String, String>,
}

impl RunContext {
    pub fn new(full_refresh: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            full_refresh,
            cursors: HashMap::new(),
        }
    }

    pub fn with_cursors(mut self, cursors: HashMap<String, String>) -> Self {
        self.cursors = cursors;
        self
    }

    /// Since-cursor for `adapter`; always `None` on a full refresh.
    pub fn since(&self, adapter: &str) -> Option<&str> {
        if self.full_refresh {
            return None;
        }
        self.cursors.get(adapter).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "completed_with_errors" => Some(RunStatus::CompletedWithErrors),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Record tallies for one adapter (or a whole run)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub fetched: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub unparsed_dates: u64,
}

impl Counts {
    pub fn absorb(&mut self, other: &Counts) {
        self.fetched += other.fetched;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        self.rejected += other.rejected;
        self.unparsed_dates += other.unparsed_dates;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSummary {
    pub adapter: String,
    pub status: AdapterStatus,
    #[serde(flatten)]
    pub counts: Counts,
    /// Rejected records by reason (`unmapped_state`, `schema_mapping`, ...)
    pub rejections: BTreeMap<String, u64>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl AdapterSummary {
    pub fn new(adapter: &str) -> Self {
        Self {
            adapter: adapter.to_string(),
            status: AdapterStatus::Succeeded,
            counts: Counts::default(),
            rejections: BTreeMap::new(),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn reject(&mut self, reason: &str) {
        self.counts.rejected += 1;
        *self.rejections.entry(reason.to_string()).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub full_refresh: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub adapters: Vec<AdapterSummary>,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn started(ctx: &RunContext) -> Self {
        Self {
            run_id: ctx.run_id,
            status: RunStatus::Running,
            full_refresh: ctx.full_refresh,
            started_at: ctx.started_at,
            finished_at: None,
            adapters: Vec::new(),
            error: None,
        }
    }

    pub fn totals(&self) -> Counts {
        let mut totals = Counts::default();
        for adapter in &self.adapters {
            totals.absorb(&adapter.counts);
        }
        totals
    }

    pub fn adapter(&self, name: &str) -> Option<&AdapterSummary> {
        self.adapters.iter().find(|a| a.adapter == name)
    }
}
