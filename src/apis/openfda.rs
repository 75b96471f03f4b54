use crate::apis::http::{FetchOutcome, JsonFetcher, RetryPolicy};
use crate::apis::{join_present, lenient_string};
use crate::config::{OpenFdaSourceConfig, RetryConfig};
use crate::constants;
use crate::domain::Source;
use crate::error::{Result, TrackerError};
use crate::pipeline::run::RunContext;
use crate::types::{RawRecord, RecordPage, SchemaRejection, SourceAdapter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// Meat and poultry recalls from the openFDA food enforcement endpoint.
pub struct OpenFdaAdapter {
    fetcher: JsonFetcher,
    base_url: String,
    queries: Vec<String>,
    page_size: u32,
    max_per_query: u32,
    run_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct FdaCursor {
    query_index: usize,
    skip: u32,
}

#[derive(Debug, Deserialize)]
struct FdaEnvelope {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FdaRecall {
    #[serde(default, deserialize_with = "lenient_string")]
    pub recall_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub recalling_firm: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub classification: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason_for_recall: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_quantity: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub recall_initiation_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub distribution_pattern: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub voluntary_mandated: Option<String>,
}

impl OpenFdaAdapter {
    pub fn new(config: &OpenFdaSourceConfig, retry: &RetryConfig) -> Result<Self> {
        if config.queries.is_empty() {
            return Err(TrackerError::Config(
                "sources.openfda.queries must not be empty".into(),
            ));
        }
        Ok(Self {
            fetcher: JsonFetcher::new(
                constants::OPENFDA_ADAPTER,
                Duration::from_secs(config.timeout_seconds),
                config.requests_per_min,
                RetryPolicy::from(retry),
            )?,
            base_url: config.base_url.clone(),
            queries: config.queries.clone(),
            page_size: config.page_size.clamp(1, constants::OPENFDA_MAX_LIMIT),
            max_per_query: config.max_per_query,
            run_timeout: config.run_timeout_seconds.map(Duration::from_secs),
        })
    }

    /// `report_date` bounds narrow each search on incremental runs
    fn search_for(&self, query: &str, since: Option<&str>, today: &str) -> String {
        match since {
            Some(since) => format!("({query}) AND report_date:[{since} TO {today}]"),
            None => query.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for OpenFdaAdapter {
    fn name(&self) -> &'static str {
        constants::OPENFDA_ADAPTER
    }

    fn source(&self) -> Source {
        Source::UsdaFsis
    }

    fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }

    #[instrument(skip(self, ctx, page), fields(adapter = constants::OPENFDA_ADAPTER))]
    async fn fetch_page(
        &self,
        ctx: &RunContext,
        since: Option<&str>,
        page: Option<&Value>,
    ) -> Result<RecordPage> {
        let cursor: FdaCursor = match page {
            Some(token) => serde_json::from_value(token.clone()).map_err(|e| {
                TrackerError::schema(constants::OPENFDA_ADAPTER, format!("bad page token: {e}"))
            })?,
            None => FdaCursor::default(),
        };
        let today = ctx.started_at.format("%Y%m%d").to_string();
        let Some(query) = self.queries.get(cursor.query_index) else {
            return Ok(RecordPage {
                checkpoint: Some(today),
                ..RecordPage::default()
            });
        };

        let limit = self
            .page_size
            .min(self.max_per_query.saturating_sub(cursor.skip))
            .max(1);
        let params = [
            ("search", self.search_for(query, since, &today)),
            ("limit", limit.to_string()),
            ("skip", cursor.skip.to_string()),
        ];
        let results = match self.fetcher.get_json(&self.base_url, &params).await? {
            FetchOutcome::Json(body) => {
                serde_json::from_value::<FdaEnvelope>(body)
                    .map_err(|e| TrackerError::schema(constants::OPENFDA_ADAPTER, e.to_string()))?
                    .results
            }
            FetchOutcome::NotFound => Vec::new(),
        };
        debug!(query = %query, skip = cursor.skip, returned = results.len(), "openFDA page");

        let returned = results.len() as u32;
        let mut out = RecordPage::default();
        for (index, item) in results.into_iter().enumerate() {
            let item_ref = item
                .get("recall_number")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("{}#{}", cursor.skip, index));
            let mapped = serde_json::from_value::<FdaRecall>(item.clone())
                .map_err(|e| TrackerError::schema(constants::OPENFDA_ADAPTER, e.to_string()))
                .and_then(|recall| recall_to_raw(recall, item));
            match mapped {
                Ok(record) => out.records.push(record),
                Err(e) => out.rejected.push(SchemaRejection {
                    item_ref,
                    message: e.to_string(),
                }),
            }
        }

        let next_skip = cursor.skip + returned;
        let query_exhausted = returned < limit || next_skip >= self.max_per_query;
        let next = if query_exhausted {
            FdaCursor {
                query_index: cursor.query_index + 1,
                skip: 0,
            }
        } else {
            FdaCursor {
                query_index: cursor.query_index,
                skip: next_skip,
            }
        };
        if next.query_index >= self.queries.len() {
            out.checkpoint = Some(today);
        } else {
            out.next_page = serde_json::to_value(&next).ok();
        }
        Ok(out)
    }
}

pub(crate) fn recall_to_raw(recall: FdaRecall, payload: Value) -> Result<RawRecord> {
    let recall_number = recall.recall_number.ok_or_else(|| {
        TrackerError::schema(constants::OPENFDA_ADAPTER, "recall without recall_number")
    })?;

    let description = join_present(
        &[
            recall.product_description.map(|s| format!("Product: {s}")),
            recall.reason_for_recall.map(|s| format!("Reason: {s}")),
            recall.product_quantity.map(|s| format!("Quantity: {s}")),
            recall.distribution_pattern.map(|s| format!("Distribution: {s}")),
            recall.voluntary_mandated.map(|s| format!("Type: {s}")),
            recall.classification.as_ref().map(|s| format!("Classification: {s}")),
        ],
        ". ",
    );

    Ok(RawRecord {
        source: Source::UsdaFsis,
        source_id: format!("FDA-{recall_number}"),
        facility_name: recall
            .recalling_firm
            .unwrap_or_else(|| "Unknown".to_string()),
        location: join_present(&[recall.city, recall.state.clone()], ", "),
        state: recall.state,
        county: None,
        latitude: None,
        longitude: None,
        violation_type: Some(constants::OPENFDA_VIOLATION_TYPE.to_string()),
        description,
        severity: recall.classification,
        date: recall.recall_initiation_date,
        penalty_amount: None,
        payload,
    })
}
