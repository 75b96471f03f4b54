//! Read side: validates client parameters and answers from the store.

use crate::domain::{Severity, Source, StateCode, Violation};
use crate::error::{Result, TrackerError};
use crate::metrics::api::QueryTimer;
use crate::pipeline::run::RunSummary;
use crate::storage::{GroupBy, PageRequest, ViolationFilter, ViolationStore};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

const TOP_STATES: usize = 20;
const DEFAULT_RUNS_LIMIT: u32 = 20;
const MAX_RUNS_LIMIT: u32 = 100;

/// Query-string parameters exactly as received; blank values count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViolationQueryParams {
    pub search: Option<String>,
    pub state: Option<String>,
    pub source: Option<String>,
    pub severity: Option<String>,
    pub violation_type: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationPage {
    pub results: Vec<Violation>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub pages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_violations: u64,
    pub by_source: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    /// The states with the most violations
    pub by_state: BTreeMap<String, u64>,
    pub states_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateCount {
    pub state: String,
    pub count: u64,
}

pub struct QueryService {
    store: Arc<dyn ViolationStore>,
    default_per_page: u32,
    max_per_page: u32,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn invalid(message: impl Into<String>) -> TrackerError {
    TrackerError::Validation(message.into())
}

fn parse_day(name: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| invalid(format!("{name} must be a calendar date (YYYY-MM-DD), got '{value}'")))
}

impl QueryService {
    pub fn new(store: Arc<dyn ViolationStore>, default_per_page: u32, max_per_page: u32) -> Self {
        let max_per_page = max_per_page.max(1);
        Self {
            store,
            default_per_page: default_per_page.clamp(1, max_per_page),
            max_per_page,
        }
    }

    /// Turn raw parameters into a store filter and page, or a validation error.
    pub fn validate(&self, params: &ViolationQueryParams) -> Result<(ViolationFilter, PageRequest)> {
        let page = match present(&params.page) {
            None => 1,
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| invalid(format!("page must be an integer >= 1, got '{raw}'")))?,
        };
        let per_page = match present(&params.per_page) {
            None => self.default_per_page,
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| (1..=self.max_per_page).contains(n))
                .ok_or_else(|| {
                    invalid(format!(
                        "per_page must be between 1 and {}, got '{raw}'",
                        self.max_per_page
                    ))
                })?,
        };

        let state = present(&params.state)
            .map(|raw| {
                StateCode::parse(raw)
                    .ok_or_else(|| invalid(format!("state must be a two-letter US state code, got '{raw}'")))
            })
            .transpose()?;
        let source = present(&params.source)
            .map(|raw| raw.parse::<Source>().map_err(invalid))
            .transpose()?;
        let severity = present(&params.severity)
            .map(|raw| {
                Severity::parse(raw)
                    .ok_or_else(|| invalid(format!("severity must be High, Medium or Low, got '{raw}'")))
            })
            .transpose()?;
        let date_from = present(&params.date_from)
            .map(|raw| parse_day("date_from", raw))
            .transpose()?;
        let date_to = present(&params.date_to)
            .map(|raw| parse_day("date_to", raw))
            .transpose()?;
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(invalid(format!("date_from {from} is after date_to {to}")));
            }
        }

        let filter = ViolationFilter {
            search: present(&params.search).map(str::to_string),
            state,
            source,
            severity,
            violation_type: present(&params.violation_type).map(str::to_string),
            date_from,
            date_to,
        };
        Ok((filter, PageRequest { page, per_page }))
    }

    pub async fn list(&self, params: &ViolationQueryParams) -> Result<ViolationPage> {
        let timer = QueryTimer::start("list");
        let (filter, page) = match self.validate(params) {
            Ok(validated) => validated,
            Err(e) => {
                timer.rejected();
                return Err(e);
            }
        };
        let (results, total) = self.store.query(&filter, page).await?;
        timer.success();
        Ok(ViolationPage {
            results,
            total,
            page: page.page,
            per_page: page.per_page,
            pages: total.div_ceil(page.per_page as u64),
        })
    }

    pub async fn get(&self, id: &str) -> Result<Violation> {
        let timer = QueryTimer::start("get");
        let Ok(uuid) = Uuid::parse_str(id.trim()) else {
            timer.rejected();
            return Err(invalid(format!("'{id}' is not a violation id")));
        };
        let found = self.store.get(uuid).await?;
        timer.success();
        found.ok_or_else(|| TrackerError::NotFound(format!("violation {uuid}")))
    }

    pub async fn stats(&self) -> Result<Stats> {
        let timer = QueryTimer::start("stats");
        let total_violations = self.store.total_count().await?;
        let by_source = self.store.aggregate_counts(GroupBy::Source).await?;
        let by_severity = self.store.aggregate_counts(GroupBy::Severity).await?;
        let by_state = self.store.aggregate_counts(GroupBy::State).await?;
        timer.success();

        Ok(Stats {
            total_violations,
            by_source: by_source.into_iter().collect(),
            by_severity: by_severity.into_iter().collect(),
            states_count: by_state.len() as u64,
            by_state: by_state.into_iter().take(TOP_STATES).collect(),
        })
    }

    /// Every state with at least one violation, ordered by code
    pub async fn states(&self) -> Result<Vec<StateCount>> {
        let timer = QueryTimer::start("states");
        let mut counts = self.store.aggregate_counts(GroupBy::State).await?;
        timer.success();
        counts.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(counts
            .into_iter()
            .map(|(state, count)| StateCount { state, count })
            .collect())
    }

    pub async fn runs(&self, limit: Option<&str>) -> Result<Vec<RunSummary>> {
        let timer = QueryTimer::start("runs");
        let limit = match limit.map(str::trim).filter(|s| !s.is_empty()) {
            None => DEFAULT_RUNS_LIMIT,
            Some(raw) => match raw.parse::<u32>().ok().filter(|n| (1..=MAX_RUNS_LIMIT).contains(n)) {
                Some(n) => n,
                None => {
                    timer.rejected();
                    return Err(invalid(format!(
                        "limit must be between 1 and {MAX_RUNS_LIMIT}, got '{raw}'"
                    )));
                }
            },
        };
        let runs = self.store.recent_runs(limit).await?;
        timer.success();
        Ok(runs)
    }
}
